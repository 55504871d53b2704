use crate::submission::ContactSubmission;

/// A rendered notification to the site owner, independent of transport.
#[derive(Clone, Debug, PartialEq)]
pub struct OutgoingMail {
    pub from_name: String,
    pub from_address: String,
    pub to: Vec<String>,
    pub reply_to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

impl OutgoingMail {
    pub fn render(
        submission: &ContactSubmission,
        from_name: &str,
        from_address: &str,
        to: &[String],
    ) -> Self {
        OutgoingMail {
            from_name: from_name.to_string(),
            from_address: from_address.to_string(),
            to: to.to_vec(),
            reply_to: submission.email.clone(),
            subject: format!("Nuevo mensaje de contacto: {}", submission.full_name),
            text: render_text(submission),
            html: render_html(submission),
        }
    }

    /// `Name <address>` form of the sender.
    pub fn from_header(&self) -> String {
        format!("{} <{}>", self.from_name, self.from_address)
    }
}

fn render_text(s: &ContactSubmission) -> String {
    format!(
        "Nombre: {}\nEmail: {}\nTeléfono: {}\nServicio: {}\nMensaje:\n{}",
        s.full_name,
        s.email,
        s.phone,
        s.service_id(),
        s.message
    )
}

fn render_html(s: &ContactSubmission) -> String {
    let message = escape_html(&s.message).replace('\n', "<br/>");
    format!(
        "<h2>Nuevo mensaje de contacto</h2>\n\
         <p><strong>Nombre:</strong> {}</p>\n\
         <p><strong>Email:</strong> {}</p>\n\
         <p><strong>Teléfono:</strong> {}</p>\n\
         <p><strong>Servicio:</strong> {}</p>\n\
         <p><strong>Mensaje:</strong></p>\n\
         <p>{message}</p>\n",
        escape_html(&s.full_name),
        escape_html(&s.email),
        escape_html(&s.phone),
        escape_html(s.service_id()),
    )
}

fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
