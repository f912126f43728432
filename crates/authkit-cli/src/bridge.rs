use async_trait::async_trait;
use authkit_core::auth::{AuthError, OAuthBridge, OAuthProvider, ProviderToken};

/// Hands over an identity token the user already obtained from the provider.
///
/// A terminal cannot run the Google or Apple sign-in sheet, so the token is pasted on the
/// command line instead.
pub struct PastedToken {
    token: ProviderToken,
}

impl PastedToken {
    pub fn new(
        token: String,
        first_name: Option<String>,
        last_name: Option<String>,
        email: Option<String>,
    ) -> Self {
        Self {
            token: ProviderToken {
                token,
                first_name,
                last_name,
                email,
            },
        }
    }
}

#[async_trait]
impl OAuthBridge for PastedToken {
    async fn sign_in(&self, provider: OAuthProvider) -> Result<ProviderToken, AuthError> {
        if self.token.token.trim().is_empty() {
            return Err(AuthError::ProviderSignIn(format!(
                "empty {provider} identity token"
            )));
        }
        Ok(self.token.clone())
    }
}
