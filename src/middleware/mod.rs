// Request pipeline, outermost first:
// bind_transaction -> authenticate -> tenant_path_override -> resolve_roles -> gates -> handler
pub mod auth;
pub mod gates;
pub mod response;
pub mod roles;
pub mod security;
pub mod transaction;

pub use auth::{authenticate, tenant_path_override, AccessToken};
pub use gates::{require_admin, require_tenant_context, require_tenant_member, require_tenant_super};
pub use response::{ApiResponse, ApiResult};
pub use roles::resolve_roles;
pub use security::with_security_headers;
pub use transaction::bind_transaction;
