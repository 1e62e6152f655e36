//! services/template_renderer.rs

use crate::{
    models::{campaign_model::Contact, sender_model::SenderIdentity, sequence_model::MessageTemplate},
    services::mail_transport::OutgoingEmail,
};

fn fill(text: &str, contact: &Contact, sender: &SenderIdentity) -> String {
    let sender_name = if sender.display_name.trim().is_empty() {
        sender.email.as_str()
    } else {
        sender.display_name.as_str()
    };
    text.replace("{{firstName}}", &contact.first_name)
        .replace("{{lastName}}", &contact.last_name)
        .replace("{{company}}", &contact.company)
        .replace("{{title}}", &contact.title)
        .replace("{{senderName}}", sender_name)
}

/// Personaliza asunto y cuerpo; los saltos de línea del cuerpo pasan a `<br>`.
pub fn render(template: &MessageTemplate, contact: &Contact, sender: &SenderIdentity) -> OutgoingEmail {
    OutgoingEmail {
        to: contact.email.clone(),
        subject: fill(&template.subject, contact, sender),
        html_body: fill(&template.body, contact, sender).replace('\n', "<br>"),
    }
}
