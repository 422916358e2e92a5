use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use crate::config::AppConfig;
use crate::dto::PlanType;
use crate::errors::ServiceError;

/// What the customer emails say about a published page.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PageSummary {
    pub title: String,
    pub start_date: NaiveDate,
    pub plan: PlanType,
    pub amount: Decimal,
    pub currency: String,
    pub page_url: String,
    /// `data:image/svg+xml;base64,...` QR code of `page_url`
    pub qr_code: Option<String>,
}

/// Customer email delivery. Implementations report success as a boolean
/// and never retry; the caller only logs and counts failures.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send_page_created_email(
        &self,
        recipient: &str,
        page_url: &str,
        summary: &PageSummary,
    ) -> bool;

    async fn send_payment_confirmation_email(&self, recipient: &str, summary: &PageSummary)
        -> bool;
}

#[derive(Debug, Serialize)]
struct OutgoingEmail<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: String,
}

/// Transactional email over a JSON HTTP API with a bearer key.
pub struct HttpEmailDispatcher {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    from: String,
}

impl HttpEmailDispatcher {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        from: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("HTTP client build failed: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            from: from.into(),
        })
    }

    async fn send(&self, recipient: &str, subject: &str, html: String) -> bool {
        let email = OutgoingEmail {
            from: &self.from,
            to: [recipient],
            subject,
            html,
        };
        match self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&email)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                info!(subject, "email accepted");
                true
            }
            Ok(response) => {
                let status = response.status();
                let detail = response.text().await.unwrap_or_default();
                warn!(subject, status = %status, detail = %detail, "email API refused message");
                false
            }
            Err(e) => {
                error!(subject, error = %e, "email API unreachable");
                false
            }
        }
    }
}

#[async_trait]
impl NotificationDispatcher for HttpEmailDispatcher {
    #[instrument(skip(self, summary))]
    async fn send_page_created_email(
        &self,
        recipient: &str,
        page_url: &str,
        summary: &PageSummary,
    ) -> bool {
        self.send(
            recipient,
            PAGE_CREATED_SUBJECT,
            render_page_created(page_url, summary),
        )
        .await
    }

    #[instrument(skip(self, summary))]
    async fn send_payment_confirmation_email(
        &self,
        recipient: &str,
        summary: &PageSummary,
    ) -> bool {
        self.send(
            recipient,
            PAYMENT_CONFIRMED_SUBJECT,
            render_payment_confirmation(summary),
        )
        .await
    }
}

/// Logs instead of sending. Used when no email API is configured.
#[derive(Debug, Default, Clone)]
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn send_page_created_email(
        &self,
        recipient: &str,
        page_url: &str,
        summary: &PageSummary,
    ) -> bool {
        info!(recipient, page_url, title = %summary.title, "page created email (not sent)");
        true
    }

    async fn send_payment_confirmation_email(
        &self,
        recipient: &str,
        summary: &PageSummary,
    ) -> bool {
        info!(recipient, amount = %summary.amount, plan = %summary.plan, "payment confirmation email (not sent)");
        true
    }
}

pub fn dispatcher_from_config(
    cfg: &AppConfig,
) -> Result<Arc<dyn NotificationDispatcher>, ServiceError> {
    match (&cfg.email_api_url, &cfg.email_api_key) {
        (Some(url), Some(key)) => Ok(Arc::new(HttpEmailDispatcher::new(
            url.clone(),
            key.clone(),
            cfg.email_from.clone(),
            cfg.provider_timeout(),
        )?)),
        _ => {
            warn!("email API not configured, notifications will only be logged");
            Ok(Arc::new(LogDispatcher))
        }
    }
}

pub const PAGE_CREATED_SUBJECT: &str = "Sua Página foi Criada - DayLove";
pub const PAYMENT_CONFIRMED_SUBJECT: &str = "Pagamento Confirmado - DayLove";

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

fn format_amount(amount: Decimal, currency: &str) -> String {
    let fixed = amount.round_dp(2).to_string();
    let (units, cents) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));
    let cents = format!("{:0<2}", cents);
    if currency.eq_ignore_ascii_case("BRL") {
        format!("R$ {},{}", units, cents)
    } else {
        format!("{} {}.{}", currency, units, cents)
    }
}

fn layout(heading: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="pt-BR">
<head><meta charset="utf-8"><title>{heading}</title></head>
<body style="font-family: Arial, sans-serif; background: #fff5f7; padding: 24px;">
  <div style="max-width: 560px; margin: 0 auto; background: #ffffff; border-radius: 12px; padding: 32px;">
    <h1 style="color: #e11d48;">{heading}</h1>
    {body}
    <p style="color: #9ca3af; font-size: 12px;">DayLove - Eternize seu amor</p>
  </div>
</body>
</html>"#
    )
}

pub fn render_page_created(page_url: &str, summary: &PageSummary) -> String {
    let url = escape_html(page_url);
    let qr = summary
        .qr_code
        .as_deref()
        .map(|src| {
            format!(
                r#"<p><img src="{}" alt="QR Code da sua página" width="200" height="200"></p>"#,
                escape_html(src)
            )
        })
        .unwrap_or_default();
    let body = format!(
        r#"<p>Sua página <strong>{title}</strong> está pronta!</p>
    <p><a href="{url}" style="background: #e11d48; color: #ffffff; padding: 12px 20px; border-radius: 8px; text-decoration: none;">Ver minha página</a></p>
    <p>Ou acesse: <a href="{url}">{url}</a></p>
    {qr}
    <p>Compartilhe o QR Code com quem você ama.</p>"#,
        title = escape_html(&summary.title),
    );
    layout("Sua página foi criada!", &body)
}

pub fn render_payment_confirmation(summary: &PageSummary) -> String {
    let body = format!(
        r#"<p>Recebemos o pagamento da sua página <strong>{title}</strong>.</p>
    <ul>
      <li>Plano: {plan}</li>
      <li>Valor: {amount}</li>
      <li>Data especial: {date}</li>
    </ul>
    <p><a href="{url}">{url}</a></p>"#,
        title = escape_html(&summary.title),
        plan = summary.plan.label(),
        amount = format_amount(summary.amount, &summary.currency),
        date = summary.start_date.format("%d/%m/%Y"),
        url = escape_html(&summary.page_url),
    );
    layout("Pagamento confirmado!", &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn summary() -> PageSummary {
        PageSummary {
            title: "Ana & <Bia>".into(),
            start_date: NaiveDate::from_ymd_opt(2021, 6, 12).unwrap(),
            plan: PlanType::Forever,
            amount: dec!(29.9),
            currency: "BRL".into(),
            page_url: "https://daylove.app/pages/1".into(),
            qr_code: Some("data:image/svg+xml;base64,AAAA".into()),
        }
    }

    #[test]
    fn templates_escape_user_content() {
        let html = render_page_created("https://daylove.app/pages/1", &summary());
        assert!(html.contains("Ana &amp; &lt;Bia&gt;"));
        assert!(!html.contains("<Bia>"));
        assert!(html.contains("data:image/svg+xml;base64,AAAA"));

        let html = render_payment_confirmation(&summary());
        assert!(html.contains("R$ 29,90"));
        assert!(html.contains("Para Sempre"));
        assert!(html.contains("12/06/2021"));
    }

    #[test]
    fn amounts_render_in_local_format() {
        assert_eq!(format_amount(dec!(19.9), "BRL"), "R$ 19,90");
        assert_eq!(format_amount(dec!(30), "BRL"), "R$ 30,00");
        assert_eq!(format_amount(dec!(5.5), "USD"), "USD 5.50");
    }

    #[tokio::test]
    async fn http_dispatcher_reports_delivery() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/emails"))
            .and(header("authorization", "Bearer re_key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "em_1"})))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = HttpEmailDispatcher::new(
            format!("{}/emails", server.uri()),
            "re_key",
            "DayLove <no-reply@daylove.app>",
            Duration::from_secs(2),
        )
        .unwrap();
        assert!(
            dispatcher
                .send_page_created_email("ana@example.com", "https://daylove.app/pages/1", &summary())
                .await
        );
    }

    #[tokio::test]
    async fn http_dispatcher_failure_is_false() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422))
            .mount(&server)
            .await;

        let dispatcher =
            HttpEmailDispatcher::new(server.uri(), "k", "from@x.test", Duration::from_secs(2))
                .unwrap();
        assert!(
            !dispatcher
                .send_payment_confirmation_email("ana@example.com", &summary())
                .await
        );
    }
}
