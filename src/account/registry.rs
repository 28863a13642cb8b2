//! Account registry: registration, OTP verification and sign-in flows.

use std::sync::Arc;

use rand::Rng;
use rand::rngs::OsRng;
use uuid::Uuid;
use validator::{ValidationError, ValidationErrors};

use crate::account::{Account, AccountStore, Role};
use crate::crypto::PasswordManager;
use crate::error::{Result, ServerError};
use crate::google::IdentityVerifier;
use crate::mail::Mailer;
use crate::token::TokenManager;

const OTP_RANGE: u32 = 1_000_000;
const MAIL_SUBJECT: &str = "Callboard account verification";

/// Registration request, already field-validated at the edge.
#[derive(Clone, Debug)]
pub struct Registration {
    pub first_name: String,
    pub last_name: String,
    pub mobile_number: String,
    pub email: String,
    pub password: String,
    pub role: Role,
}

/// What happened on a registration request.
#[derive(Clone, Debug)]
pub enum RegisterOutcome {
    /// A new unverified account was created and an OTP dispatched.
    OtpSent { activation_token: String },
    /// The identity already existed under the other role; its role was
    /// overwritten in place, no second record was created.
    RoleUpdated { account: Account },
}

/// Outcome of a successful sign-in.
#[derive(Clone, Debug)]
pub struct Session {
    pub token: String,
    pub account: Account,
}

fn missing_identifier() -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    errors.add(
        "email",
        ValidationError::new("identifier").with_message(
            "Provide either email or mobile number to sign in.".into(),
        ),
    );
    errors
}

/// Orchestrates the account lifecycle over its outbound ports.
///
/// Every operation is an independent transaction against the shared
/// store; the unique indexes there close the lookup-then-create races.
#[derive(Clone)]
pub struct AccountRegistry {
    store: Arc<dyn AccountStore>,
    pwd: PasswordManager,
    token: TokenManager,
    mail: Arc<dyn Mailer>,
    identity: Arc<dyn IdentityVerifier>,
}

impl AccountRegistry {
    /// Create a new [`AccountRegistry`].
    pub fn new(
        store: Arc<dyn AccountStore>,
        pwd: PasswordManager,
        token: TokenManager,
        mail: Arc<dyn Mailer>,
        identity: Arc<dyn IdentityVerifier>,
    ) -> Self {
        Self {
            store,
            pwd,
            token,
            mail,
            identity,
        }
    }

    /// Register a new account, or transfer the role of an existing one.
    ///
    /// On the fresh-account path the caller receives an activation token
    /// embedding the OTP; the OTP itself only travels by mail. A mail
    /// dispatch failure is surfaced but the created account is kept:
    /// registration stays retryable.
    pub async fn register(&self, req: Registration) -> Result<RegisterOutcome> {
        let existing = self
            .store
            .find_by_contact(Some(&req.email), Some(&req.mobile_number))
            .await?;

        if let Some(account) = existing {
            if account.role == Some(req.role) {
                return Err(ServerError::Conflict(format!(
                    "already registered with this email or mobile number as a {}",
                    req.role
                )));
            }

            // Existing identity under another role (or none): overwrite
            // the role in place. The stored credential is kept.
            self.store.update_role(account.id, req.role).await?;
            tracing::info!(account_id = %account.id, role = %req.role, "role transferred");

            let account = self
                .store
                .find_by_id(account.id)
                .await?
                .ok_or_else(|| ServerError::NotFound("account not found".into()))?;
            return Ok(RegisterOutcome::RoleUpdated { account });
        }

        let password_hash = self.pwd.hash_password(&req.password).map_err(
            |err| ServerError::Internal {
                details: "password hashing failed".into(),
                source: Some(Box::new(err)),
            },
        )?;

        let now = chrono::Utc::now();
        let account = Account {
            id: Uuid::new_v4(),
            first_name: req.first_name,
            last_name: req.last_name,
            email: req.email,
            mobile_number: Some(req.mobile_number),
            password_hash: Some(password_hash),
            role: Some(req.role),
            is_verified: false,
            created_at: now,
            updated_at: now,
        };
        self.store.insert(&account).await?;
        tracing::info!(account_id = %account.id, role = %req.role, "account created");

        // Full 6-digit range, small values are zero-padded for display.
        let otp = OsRng.gen_range(0..OTP_RANGE);
        let activation_token =
            self.token.create_activation(account.id, otp, req.role)?;

        self.mail
            .send(
                &account.email,
                MAIL_SUBJECT,
                &format!(
                    "Please verify your email address using the following OTP: {otp:06}"
                ),
            )
            .await?;

        Ok(RegisterOutcome::OtpSent { activation_token })
    }

    /// Confirm control of the registered email address.
    ///
    /// Idempotent: replaying a still-valid token/OTP pair after success
    /// re-sets the same flag.
    pub async fn verify(&self, otp: u32, activation_token: &str) -> Result<Role> {
        let claims = self.token.decode_activation(activation_token)?;

        if claims.otp != otp {
            return Err(ServerError::Auth("wrong OTP".into()));
        }

        let account = self
            .store
            .find_by_id(claims.sub)
            .await?
            .filter(|account| account.role == Some(claims.role))
            .ok_or_else(|| ServerError::NotFound("account not found".into()))?;

        self.store.mark_verified(account.id).await?;
        tracing::info!(account_id = %account.id, "account verified");

        Ok(claims.role)
    }

    /// Role-scoped credential sign-in.
    ///
    /// Unknown identifier and wrong password are indistinguishable; only
    /// a role mismatch on a known identity is revealed.
    pub async fn login(
        &self,
        role: Role,
        email: Option<&str>,
        mobile_number: Option<&str>,
        password: &str,
    ) -> Result<Session> {
        if email.is_none() && mobile_number.is_none() {
            return Err(missing_identifier().into());
        }

        let Some(account) =
            self.store.find_by_contact(email, mobile_number).await?
        else {
            // An unknown identifier still pays for a verification.
            self.pwd.verify_password(password, None);
            return Err(ServerError::invalid_credentials());
        };

        match account.role {
            Some(r) if r != role => {
                tracing::debug!(account_id = %account.id, expected = %role, "role scope mismatch");
                return Err(ServerError::RoleScope(role));
            },
            // Federated-only accounts carry no role and no digest; they
            // fail closed at the credential check below.
            _ => {},
        }

        if !self
            .pwd
            .verify_password(password, account.password_hash.as_deref())
        {
            return Err(ServerError::invalid_credentials());
        }

        let token = self.token.create_session(account.id)?;
        tracing::info!(account_id = %account.id, %role, "signed in");

        Ok(Session { token, account })
    }

    /// Federated (Google) sign-in.
    ///
    /// First sight of an email creates a verified, role-less,
    /// passwordless account; later sign-ins reuse it.
    pub async fn federated_login(&self, token_id: &str) -> Result<Session> {
        let identity = self.identity.verify(token_id).await?;

        let account = match self.store.find_by_email(&identity.email).await? {
            Some(account) => account,
            None => {
                let (first_name, last_name) = split_name(&identity.name);
                let now = chrono::Utc::now();
                let account = Account {
                    id: Uuid::new_v4(),
                    first_name,
                    last_name,
                    email: identity.email.clone(),
                    mobile_number: None,
                    password_hash: None,
                    role: None,
                    is_verified: true,
                    created_at: now,
                    updated_at: now,
                };

                match self.store.insert(&account).await {
                    Ok(()) => {
                        tracing::info!(account_id = %account.id, "federated account created");
                        account
                    },
                    // Lost the race against a concurrent first sign-in;
                    // the winner's record is ours to reuse.
                    Err(ServerError::Conflict(_)) => self
                        .store
                        .find_by_email(&identity.email)
                        .await?
                        .ok_or_else(|| ServerError::NotFound(
                            "account not found".into(),
                        ))?,
                    Err(err) => return Err(err),
                }
            },
        };

        let token = self.token.create_session(account.id)?;
        tracing::info!(account_id = %account.id, "federated sign-in");

        Ok(Session { token, account })
    }
}

/// First whitespace token becomes the first name, the remainder the
/// last name; a single-token name leaves the last name empty.
fn split_name(name: &str) -> (String, String) {
    match name.trim().split_once(' ') {
        Some((first, rest)) => (first.to_string(), rest.trim().to_string()),
        None => (name.trim().to_string(), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::testing::MemoryStore;
    use crate::config::Argon2 as ArgonConfig;
    use crate::google::testing::StaticVerifier;
    use crate::mail::testing::RecordingMailer;

    fn registry() -> (AccountRegistry, Arc<MemoryStore>, Arc<RecordingMailer>) {
        registry_with(
            RecordingMailer::default(),
            StaticVerifier::known("greta@example.com", "Greta Gerwig"),
        )
    }

    fn registry_with(
        mail: RecordingMailer,
        identity: StaticVerifier,
    ) -> (AccountRegistry, Arc<MemoryStore>, Arc<RecordingMailer>) {
        let store = Arc::new(MemoryStore::new());
        let mail = Arc::new(mail);
        let registry = AccountRegistry::new(
            Arc::clone(&store) as Arc<dyn AccountStore>,
            PasswordManager::new(Some(ArgonConfig {
                memory_cost: 8,
                iterations: 1,
                parallelism: 1,
                hash_length: 32,
            }))
            .unwrap(),
            TokenManager::new("registry-test-secret"),
            Arc::clone(&mail) as Arc<dyn Mailer>,
            Arc::new(identity),
        );
        (registry, store, mail)
    }

    fn registration(role: Role) -> Registration {
        Registration {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            mobile_number: "+33612345678".into(),
            email: "ada@example.com".into(),
            password: "correct-horse".into(),
            role,
        }
    }

    #[tokio::test]
    async fn test_register_then_verify() {
        let (registry, store, mail) = registry();

        let outcome =
            registry.register(registration(Role::Director)).await.unwrap();
        let RegisterOutcome::OtpSent { activation_token } = outcome else {
            panic!("expected a fresh registration");
        };

        let account = store
            .find_by_email("ada@example.com")
            .await
            .unwrap()
            .unwrap();
        assert!(!account.is_verified);
        assert_eq!(account.role, Some(Role::Director));
        // Stored credential is hashed, never plaintext.
        assert_ne!(
            account.password_hash.as_deref(),
            Some("correct-horse")
        );

        let otp = mail.last_otp();
        assert!(otp < OTP_RANGE);
        let role = registry.verify(otp, &activation_token).await.unwrap();
        assert_eq!(role, Role::Director);

        let account = store
            .find_by_email("ada@example.com")
            .await
            .unwrap()
            .unwrap();
        assert!(account.is_verified);
    }

    #[tokio::test]
    async fn test_register_same_role_conflicts() {
        let (registry, store, _) = registry();

        registry.register(registration(Role::Artist)).await.unwrap();
        let err = registry
            .register(registration(Role::Artist))
            .await
            .unwrap_err();

        assert!(matches!(err, ServerError::Conflict(_)));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_register_other_role_transfers() {
        let (registry, store, _) = registry();

        registry.register(registration(Role::Artist)).await.unwrap();
        let outcome = registry
            .register(registration(Role::Director))
            .await
            .unwrap();

        let RegisterOutcome::RoleUpdated { account } = outcome else {
            panic!("expected a role transfer");
        };
        assert_eq!(account.role, Some(Role::Director));
        // Mutated in place, no duplicate record.
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_register_mail_failure_keeps_account() {
        let (registry, store, _) = registry_with(
            RecordingMailer::failing(),
            StaticVerifier::rejecting(),
        );

        let err = registry
            .register(registration(Role::Artist))
            .await
            .unwrap_err();

        assert!(matches!(err, ServerError::Dependency { .. }));
        // The unverified account survives, registration can be retried.
        assert_eq!(store.len(), 1);
        let account = store
            .find_by_email("ada@example.com")
            .await
            .unwrap()
            .unwrap();
        assert!(!account.is_verified);
    }

    #[tokio::test]
    async fn test_verify_wrong_otp() {
        let (registry, store, mail) = registry();

        let RegisterOutcome::OtpSent { activation_token } =
            registry.register(registration(Role::Artist)).await.unwrap()
        else {
            panic!("expected a fresh registration");
        };

        let wrong = (mail.last_otp() + 1) % OTP_RANGE;
        let err =
            registry.verify(wrong, &activation_token).await.unwrap_err();

        assert!(matches!(err, ServerError::Auth(_)));
        let account = store
            .find_by_email("ada@example.com")
            .await
            .unwrap()
            .unwrap();
        assert!(!account.is_verified);
    }

    #[tokio::test]
    async fn test_verify_is_idempotent() {
        let (registry, _, mail) = registry();

        let RegisterOutcome::OtpSent { activation_token } =
            registry.register(registration(Role::Artist)).await.unwrap()
        else {
            panic!("expected a fresh registration");
        };
        let otp = mail.last_otp();

        registry.verify(otp, &activation_token).await.unwrap();
        let role = registry.verify(otp, &activation_token).await.unwrap();
        assert_eq!(role, Role::Artist);
    }

    #[tokio::test]
    async fn test_verify_garbage_token() {
        let (registry, _, _) = registry();
        let err = registry.verify(123_456, "nonsense").await.unwrap_err();
        assert!(matches!(err, ServerError::Auth(_)));
    }

    #[tokio::test]
    async fn test_login_happy_path() {
        let (registry, _, mail) = registry();

        let RegisterOutcome::OtpSent { activation_token } = registry
            .register(registration(Role::Director))
            .await
            .unwrap()
        else {
            panic!("expected a fresh registration");
        };
        registry
            .verify(mail.last_otp(), &activation_token)
            .await
            .unwrap();

        let session = registry
            .login(
                Role::Director,
                Some("ada@example.com"),
                None,
                "correct-horse",
            )
            .await
            .unwrap();

        assert_eq!(session.account.email, "ada@example.com");
        assert!(!session.token.is_empty());
    }

    #[tokio::test]
    async fn test_login_by_mobile_number() {
        let (registry, _, _) = registry();
        registry.register(registration(Role::Artist)).await.unwrap();

        let session = registry
            .login(Role::Artist, None, Some("+33612345678"), "correct-horse")
            .await
            .unwrap();

        assert_eq!(session.account.email, "ada@example.com");
    }

    #[tokio::test]
    async fn test_login_requires_identifier() {
        let (registry, _, _) = registry();
        let err = registry
            .login(Role::Artist, None, None, "whatever")
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Validation(_)));
    }

    #[tokio::test]
    async fn test_login_failures_are_indistinguishable() {
        let (registry, _, _) = registry();
        registry.register(registration(Role::Artist)).await.unwrap();

        let unknown = registry
            .login(Role::Artist, Some("nobody@example.com"), None, "pw")
            .await
            .unwrap_err();
        let wrong_password = registry
            .login(Role::Artist, Some("ada@example.com"), None, "bad-pw")
            .await
            .unwrap_err();

        assert_eq!(unknown.to_string(), wrong_password.to_string());
    }

    #[tokio::test]
    async fn test_login_wrong_role_endpoint() {
        let (registry, _, _) = registry();
        registry.register(registration(Role::Artist)).await.unwrap();

        let err = registry
            .login(
                Role::Director,
                Some("ada@example.com"),
                None,
                "correct-horse",
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ServerError::RoleScope(Role::Director)));
    }

    #[tokio::test]
    async fn test_federated_login_creates_once() {
        let (registry, store, _) = registry();

        let first = registry.federated_login("a-google-token").await.unwrap();
        assert_eq!(first.account.email, "greta@example.com");
        assert_eq!(first.account.first_name, "Greta");
        assert_eq!(first.account.last_name, "Gerwig");
        assert!(first.account.is_verified);
        assert_eq!(first.account.role, None);
        assert_eq!(first.account.password_hash, None);

        let second = registry.federated_login("a-google-token").await.unwrap();
        assert_eq!(second.account.id, first.account.id);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_federated_account_cannot_password_login() {
        let (registry, _, _) = registry();
        registry.federated_login("a-google-token").await.unwrap();

        // No role, no credential: generic failure, no crash.
        let err = registry
            .login(Role::Artist, Some("greta@example.com"), None, "anything")
            .await
            .unwrap_err();

        assert!(matches!(err, ServerError::Auth(_)));
    }

    #[tokio::test]
    async fn test_federated_login_invalid_token() {
        let (registry, _, _) = registry_with(
            RecordingMailer::default(),
            StaticVerifier::rejecting(),
        );

        let err = registry.federated_login("forged").await.unwrap_err();
        assert!(matches!(err, ServerError::Auth(_)));
    }

    #[test]
    fn test_split_name() {
        assert_eq!(
            split_name("Greta Gerwig"),
            ("Greta".to_string(), "Gerwig".to_string())
        );
        assert_eq!(
            split_name("Jean Claude Van Damme"),
            ("Jean".to_string(), "Claude Van Damme".to_string())
        );
        assert_eq!(
            split_name("Prince"),
            ("Prince".to_string(), String::new())
        );
    }
}
