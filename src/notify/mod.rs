// src/notify/mod.rs
//
// Mailing the merged report.

use anyhow::{anyhow, Context, Result};
use lettre::{
    message::{
        header::{ContentTransferEncoding, ContentType},
        Attachment as MimeAttachment, Body, Mailbox, Message, MultiPart, SinglePart,
    },
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
};
use std::{collections::HashSet, fs, path::Path};
use tracing::{info, instrument};

use crate::config::MailConfig;

/// A file carried by the email, named after its base name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content: Vec<u8>,
}

impl Attachment {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow!("attachment path {} has no file name", path.display()))?;
        let content =
            fs::read(path).with_context(|| format!("reading attachment {}", path.display()))?;
        Ok(Self { filename, content })
    }
}

#[derive(Debug, Clone)]
pub struct Email {
    pub sender: String,
    pub recipient: String,
    pub cc: Vec<String>,
    pub subject: String,
    pub body: String,
    pub attachment: Attachment,
}

impl Email {
    pub fn new(mail: &MailConfig, attachment: Attachment) -> Self {
        Self {
            sender: mail.sender.clone(),
            recipient: mail.recipient.clone(),
            cc: mail.cc.clone(),
            subject: mail.subject.clone(),
            body: mail.body.clone(),
            attachment,
        }
    }

    /// Primary recipient first, then CC addresses, each address once
    /// (compared case-insensitively).
    pub fn recipients(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        std::iter::once(&self.recipient)
            .chain(&self.cc)
            .map(|a| a.trim())
            .filter(|a| seen.insert(a.to_lowercase()))
            .map(str::to_string)
            .collect()
    }

    /// Build the MIME message: a plain-text part plus the base64 attachment.
    pub fn to_message(&self) -> Result<Message> {
        let mut recipients = self.recipients().into_iter();
        let primary = recipients
            .next()
            .ok_or_else(|| anyhow!("email has no recipient"))?;

        let mut builder = Message::builder()
            .from(parse_mailbox(&self.sender)?)
            .to(parse_mailbox(&primary)?)
            .subject(&self.subject);
        for cc in recipients {
            builder = builder.cc(parse_mailbox(&cc)?);
        }

        let body = Body::new_with_encoding(
            self.attachment.content.clone(),
            ContentTransferEncoding::Base64,
        )
        .map_err(|_| anyhow!("attachment could not be base64 encoded"))?;
        let attachment = MimeAttachment::new(self.attachment.filename.clone())
            .body(body, ContentType::parse("application/octet-stream")?);

        builder
            .multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(self.body.clone()))
                    .singlepart(attachment),
            )
            .context("building email message")
    }
}

fn parse_mailbox(addr: &str) -> Result<Mailbox> {
    addr.parse().with_context(|| format!("invalid address {addr:?}"))
}

/// Anything that can hand an email to a mail server.
#[allow(async_fn_in_trait)]
pub trait MailTransport {
    async fn deliver(&self, email: &Email) -> Result<()>;
}

/// Authenticated SMTP submission over STARTTLS.
pub struct SmtpRelay {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpRelay {
    pub fn new(mail: &MailConfig, app_password: &str) -> Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&mail.relay)
            .with_context(|| format!("configuring relay {}", mail.relay))?
            .port(mail.port)
            .credentials(Credentials::new(
                mail.sender.clone(),
                app_password.to_string(),
            ))
            .build();
        Ok(Self { transport })
    }
}

impl MailTransport for SmtpRelay {
    async fn deliver(&self, email: &Email) -> Result<()> {
        let response = self
            .transport
            .send(email.to_message()?)
            .await
            .context("sending email")?;
        info!(code = %response.code(), "relay accepted message");
        Ok(())
    }
}

/// What was sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub filename: String,
    pub recipients: Vec<String>,
    pub size_bytes: u64,
}

/// Mail `attachment_path` through `transport` using the configured addresses.
///
/// In production `transport` is an [`SmtpRelay`], which holds the app password.
#[instrument(level = "info", skip_all, fields(attachment = %attachment_path.as_ref().display()))]
pub async fn send_report<T: MailTransport>(
    transport: &T,
    mail: &MailConfig,
    attachment_path: impl AsRef<Path>,
) -> Result<Receipt> {
    let attachment = Attachment::from_file(attachment_path)?;
    let email = Email::new(mail, attachment);
    let recipients = email.recipients();

    transport.deliver(&email).await?;
    info!(to = ?recipients, "email sent");
    Ok(Receipt {
        filename: email.attachment.filename,
        recipients,
        size_bytes: email.attachment.content.len() as u64,
    })
}
