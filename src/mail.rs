//! Send emails to user for important updates.
//!
//! Delivery itself is owned by a separate worker; this module only
//! publishes cloudevents onto a RabbitMQ queue.

use std::borrow::Cow;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use lapin::options::{BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::uri::{
    AMQPAuthority, AMQPScheme, AMQPUri, AMQPUserInfo,
};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use rand::Rng;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use serde::Serialize;
use url::Url;

use crate::config::Mail;
use crate::error::{Result, ServerError};

const DEFAULT_AMPQ_HOST: &str = "localhost";
const DEFAULT_AMPQ_PORT: u16 = 5672;
const DEFAULT_AMPQ_VHOST: &str = "/";

const CONTENT_ENCODING: &str = "utf8";
const CONTENT_TYPE: &str = "application/cloudevents+json";
const DATA_CONTENT_TYPE: &str = "application/json";
const CLOUDEVENT_VERSION: &str = "1.0";
const ID_LENGTH: usize = 12;

/// Port for dispatching mail to an address.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Queue one message. A failed dispatch surfaces as
    /// [`ServerError::Dependency`]; the caller decides what to roll back
    /// (for registration: nothing).
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct Cloudevent<'a> {
    specversion: &'static str,
    r#type: &'static str,
    source: &'static str,
    id: String,
    time: String,
    datacontenttype: &'static str,
    data: Content<'a>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    to: Cow<'a, str>,
    subject: Cow<'a, str>,
    body: Cow<'a, str>,
}

/// RabbitMQ-backed [`Mailer`].
#[derive(Clone, Default)]
pub struct MailManager {
    queue: String,
    conn: Option<Arc<Connection>>,
}

impl MailManager {
    /// Create a new [`MailManager`].
    pub async fn new(config: &Mail) -> Result<Self> {
        let addr = Url::parse(&config.address).map_err(|err| {
            ServerError::dependency("invalid rabbitmq address", err)
        })?;
        let uri = AMQPUri {
            scheme: AMQPScheme::from_str(addr.scheme()).unwrap_or_default(),
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: config.username.clone(),
                    password: config.password.clone(),
                },
                host: addr.host_str().unwrap_or(DEFAULT_AMPQ_HOST).into(),
                port: addr.port().unwrap_or(DEFAULT_AMPQ_PORT),
            },
            vhost: config
                .vhost
                .clone()
                .unwrap_or(DEFAULT_AMPQ_VHOST.to_string()),
            query: Default::default(),
        };

        let conn_config = ConnectionProperties::default()
            .with_connection_name("callboard_mail_client".into());
        let conn = Connection::connect_uri(uri, conn_config)
            .await
            .map_err(|err| {
                ServerError::dependency("rabbitmq connection failed", err)
            })?;

        tracing::info!(%addr, "rabbitmq connected");

        Ok(Self {
            queue: config.queue.clone(),
            conn: Some(Arc::new(conn)),
        })
    }

    async fn create_channel(
        conn: Arc<Connection>,
        queue: &str,
    ) -> Result<Channel> {
        let channel = conn.create_channel().await.map_err(|err| {
            ServerError::dependency("rabbitmq channel failed", err)
        })?;
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                ServerError::dependency("rabbitmq queue declare failed", err)
            })?;
        Ok(channel)
    }

    fn create_event(data: Content) -> Cloudevent {
        let id: String = (0..ID_LENGTH)
            .map(|_| OsRng.sample(Alphanumeric) as char)
            .collect();
        Cloudevent {
            specversion: CLOUDEVENT_VERSION,
            r#type: "com.callboard.email",
            source: "com.callboard.accounts",
            id,
            time: Utc::now().to_rfc3339(),
            datacontenttype: DATA_CONTENT_TYPE,
            data,
        }
    }
}

/// MUST NEVER be used in production.
#[cfg(test)]
pub mod testing {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::Mailer;
    use crate::error::{Result, ServerError};

    /// Mailer double recording every dispatch, optionally failing.
    #[derive(Default)]
    pub struct RecordingMailer {
        pub sent: Mutex<Vec<(String, String, String)>>,
        pub fail: bool,
    }

    impl RecordingMailer {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        /// Last OTP dispatched, parsed from the tail of the mail body.
        pub fn last_otp(&self) -> u32 {
            let sent = self.sent.lock().unwrap();
            let (_, _, body) = sent.last().expect("no mail dispatched");
            body.rsplit(' ').next().unwrap().parse().unwrap()
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(
            &self,
            to: &str,
            subject: &str,
            body: &str,
        ) -> Result<()> {
            if self.fail {
                return Err(ServerError::Dependency {
                    details: "mail broker down".into(),
                    source: None,
                });
            }
            self.sent.lock().unwrap().push((
                to.to_string(),
                subject.to_string(),
                body.to_string(),
            ));
            Ok(())
        }
    }
}

#[async_trait]
impl Mailer for MailManager {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        // Without a `mail` config section there is nothing to publish to.
        let Some(conn) = &self.conn else {
            tracing::debug!(%subject, "mail dropped, no broker configured");
            return Ok(());
        };
        let channel =
            Self::create_channel(Arc::clone(conn), &self.queue).await?;

        let content = Content {
            to: Cow::from(to),
            subject: Cow::from(subject),
            body: Cow::from(body),
        };
        let payload = Self::create_event(content);
        let payload =
            serde_json::to_string(&payload).map_err(|err| {
                ServerError::dependency("mail event not serializable", err)
            })?;

        channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                payload.as_bytes(),
                BasicProperties::default()
                    .with_content_encoding(CONTENT_ENCODING.into())
                    .with_content_type(CONTENT_TYPE.into()),
            )
            .await
            .map_err(|err| {
                ServerError::dependency("mail publish failed", err)
            })?;

        tracing::trace!(%subject, "mail event sent");

        Ok(())
    }
}
