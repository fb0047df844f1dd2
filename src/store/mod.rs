mod contacts;
mod cursors;
mod db;
mod forms;
mod invoices;
mod leads;
mod mail;
mod tickets;

pub use contacts::CustomerUpsert;
pub use db::Store;
pub use forms::FormImport;
pub use invoices::PaymentImport;
pub use leads::LeadImport;
pub use tickets::{RemoteTicket, RemoteTicketMessage, TicketLocalUpdate};
