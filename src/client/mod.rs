//! The API lookup client (spec §4.F), the network transport boundary, the
//! finite lookup-endpoint table, and assembled client configuration.

pub mod api_lookup;
pub mod endpoints;
pub mod settings;
pub mod transport;

pub use api_lookup::{ApiClient, ApiLookupClient};
pub use settings::{
    ApiLookupSettings, AuthenticationSettings, ClientSettings, ClientSettingsBuilder, ProxySettings,
    ProxyType, RetrySettings, TokenProvider,
};
pub use transport::{Transport, TransportRequest, TransportResponse};
