//! Services module for afip-service.

pub mod metrics;
pub mod padron;
pub mod persistence;
pub mod signer;
pub mod tickets;
pub mod wsaa;
pub mod wsfe;

pub use metrics::{get_metrics, init_metrics};
pub use padron::{RegistryClient, PADRON_SERVICE};
pub use persistence::{
    FileTicketPersistence, InMemoryTicketPersistence, RedisTicketPersistence, TicketPersistence,
};
pub use signer::{CmsSigner, LoginSigner, OpensslCmsSigner};
pub use tickets::TicketStore;
pub use wsaa::{AuthClient, TicketIssuer};
pub use wsfe::{InvoiceClient, WSFE_SERVICE};
