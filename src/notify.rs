use crate::error::Error;
use crate::flagging::Channel;
use crate::period::ReportingPeriod;
use log::info;
use serde::Serialize;
use std::path::PathBuf;

/// Weekly trigger notification. Built in full before sending; the mailer
/// only ever sees a finished message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerEmail {
    pub subject: String,
    pub body: String,
    pub from: String,
    pub recipients: Vec<String>,
    pub attachments: Vec<PathBuf>,
}

impl TriggerEmail {
    pub fn new(
        channel: Channel,
        period: &ReportingPeriod,
        from: &str,
        recipients: Vec<String>,
        attachments: Vec<PathBuf>,
    ) -> Self {
        let span = period.date_span_label();
        TriggerEmail {
            subject: format!("AUTOMATED: {} Triggers {span}", channel.label()),
            body: format!(
                "Attached are the {} triggers for the week of {span}.\n\n\
                 This report was generated automatically.",
                channel.label()
            ),
            from: from.to_string(),
            recipients,
            attachments,
        }
    }

    pub fn recipient_line(&self) -> String {
        self.recipients.join("; ")
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &TriggerEmail) -> Result<(), Error>;
}

#[derive(Serialize)]
struct RelayAttachment {
    filename: String,
    content: String,
}

#[derive(Serialize)]
struct RelayMessage {
    from: String,
    to: String,
    subject: String,
    body: String,
    attachments: Vec<RelayAttachment>,
}

/// Posts the message to an internal HTTP mail relay as JSON. Attachment
/// files are read at send time so a late regeneration of the workbook is
/// what actually goes out.
pub struct HttpMailer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpMailer {
    pub fn new(endpoint: &str) -> Self {
        HttpMailer {
            client: reqwest::Client::new(),
            endpoint: endpoint.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, email: &TriggerEmail) -> Result<(), Error> {
        let mut attachments = Vec::with_capacity(email.attachments.len());
        for path in &email.attachments {
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let content = tokio::fs::read_to_string(path).await?;
            attachments.push(RelayAttachment { filename, content });
        }

        let message = RelayMessage {
            from: email.from.clone(),
            to: email.recipient_line(),
            subject: email.subject.clone(),
            body: email.body.clone(),
            attachments,
        };

        self.client
            .post(&self.endpoint)
            .json(&message)
            .send()
            .await?
            .error_for_status()?;

        info!(
            "sent '{}' to {} with {} attachments",
            email.subject,
            email.recipient_line(),
            email.attachments.len()
        );
        Ok(())
    }
}
