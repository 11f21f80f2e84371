//! Domain models for invoicing-service.

mod company;
mod invoice;
mod invoice_item;

pub use company::{Company, CreateCompany};
pub use invoice::{
    CreateInvoice, Invoice, InvoiceDetail, InvoiceSort, InvoiceStatus, ListInvoicesFilter,
    MarkPaid, UpdateInvoice, DEFAULT_PPN_PERCENTAGE,
};
pub use invoice_item::{InvoiceItem, NewInvoiceItem};

pub(crate) use invoice::patch;
