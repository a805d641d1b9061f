//! Built-in gateway filters

pub mod auth;
pub mod error_log;
pub mod headers;

pub use auth::ApiKeyFilter;
pub use error_log::ErrorLoggingFilter;
pub use headers::{
    ForwardedHeadersFilter, HiddenResponseHeadersFilter, RequestIdFilter, SensitiveHeadersFilter,
};

use crate::config::GatewayConfig;
use crate::gateway::filter::FilterChain;

/// Default filter chain for a gateway configuration
pub fn default_chain(config: &GatewayConfig) -> FilterChain {
    let mut chain = FilterChain::new()
        .with(RequestIdFilter)
        .with(ForwardedHeadersFilter)
        .with(SensitiveHeadersFilter::new(&config.sensitive_headers))
        .with(HiddenResponseHeadersFilter::new(&config.hidden_response_headers))
        .with(ErrorLoggingFilter);

    if let Some(auth) = ApiKeyFilter::from_config(&config.auth) {
        chain = chain.with(auth);
    }
    chain
}
