//! Ambient context carried with every forwarded call

/// Who the call is made for and where it came from
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub user_id: String,
    pub user_name: String,
    /// User agent of the inbound request that triggered the call
    pub user_agent: Option<String>,
    /// Thumbprint of the certificate presented for this user
    pub credential_thumbprint: Option<String>,
}

impl RequestContext {
    /// Summary sent upstream in the source user context header
    pub fn describe(&self) -> String {
        format!(
            "UserId={};UserName={};Cert={}",
            self.user_id,
            self.user_name,
            self.credential_thumbprint.as_deref().unwrap_or("")
        )
    }
}
