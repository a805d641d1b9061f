//! Error-stage logging

use async_trait::async_trait;
use tracing::{error, warn};

use crate::error::Result;
use crate::gateway::filter::{FilterStage, GatewayFilter, RequestContext};

/// Logs every failed request with its route and attempt count
pub struct ErrorLoggingFilter;

#[async_trait]
impl GatewayFilter for ErrorLoggingFilter {
    fn name(&self) -> &str {
        "error_log"
    }

    fn stage(&self) -> FilterStage {
        FilterStage::Error
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<()> {
        let Some(failure) = ctx.error.as_ref() else {
            return Ok(());
        };
        let status = failure.status_code();
        let service = ctx.route.as_ref().map(|r| r.service_id.as_str()).unwrap_or("-");

        if status.is_server_error() {
            error!(
                request_id = %ctx.request_id,
                method = %ctx.method,
                path = %ctx.path(),
                service = %service,
                attempts = ctx.attempts,
                status = status.as_u16(),
                error = %failure,
                "Request failed"
            );
        } else {
            warn!(
                request_id = %ctx.request_id,
                method = %ctx.method,
                path = %ctx.path(),
                status = status.as_u16(),
                error = %failure,
                "Request rejected"
            );
        }
        Ok(())
    }
}
