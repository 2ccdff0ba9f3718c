//! Email Template Engine
//!
//! Handlebars rendering for notifier mails. HTML bodies are escaped, plain
//! text bodies are not.

use anyhow::{anyhow, Context, Result};
use handlebars::{no_escape, Handlebars};
use pharmy_utils::mailer::RenderedEmail;
use serde::Serialize;

pub const LOW_STOCK_DIGEST: &str = "low_stock_digest";


const DIGEST_SUBJECT: &str =
    "[{{tenant_name}}] {{summary.total_alerts}} low-stock alerts, {{expiring_count}} expiring batches";

const DIGEST_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><style>body{font-family:Arial,sans-serif;line-height:1.5;color:#333;}.header{background:#0f766e;color:white;padding:16px;}.content{padding:16px;}table{border-collapse:collapse;width:100%;margin-bottom:16px;}th,td{border:1px solid #e5e7eb;padding:6px 8px;text-align:left;}th{background:#f3f4f6;}.HIGH{color:#b91c1c;font-weight:bold;}.MEDIUM{color:#b45309;}.footer{background:#f3f4f6;padding:16px;font-size:12px;}</style></head>
<body>
<div class="header"><h2>Stock digest for {{tenant_name}}</h2></div>
<div class="content">
{{#if alerts}}
<h3>Low stock ({{summary.total_alerts}} products, {{summary.out_of_stock}} out of stock)</h3>
<table>
<tr><th>Product</th><th>SKU</th><th>In stock</th><th>Reorder level</th><th>Suggested order</th><th>Priority</th><th>Days to stock-out</th></tr>
{{#each alerts}}<tr><td>{{product_name}}</td><td>{{sku}}</td><td>{{current_stock}} {{unit}}</td><td>{{reorder_level}}</td><td>{{suggested_quantity}}</td><td class="{{priority}}">{{priority}}</td><td>{{days_to_stockout}}</td></tr>
{{/each}}</table>
{{#if more_alerts}}<p>...and {{more_alerts}} more products below their reorder level.</p>{{/if}}
{{/if}}
{{#if expiring}}
<h3>Expiring within {{warning_days}} days ({{expiring_units}} units)</h3>
<table>
<tr><th>Product</th><th>Batch</th><th>Supplier</th><th>Expiry date</th><th>Days left</th><th>Quantity</th></tr>
{{#each expiring}}<tr><td>{{product_name}}</td><td>{{batch_number}}</td><td>{{supplier_name}}</td><td>{{expiry_date}}</td><td>{{days_to_expiry}}</td><td>{{quantity}}</td></tr>
{{/each}}</table>
{{#if more_expiring}}<p>...and {{more_expiring}} more batches.</p>{{/if}}
{{/if}}
<p>Reorder suggestions have been refreshed and are available in Pharmy.</p>
</div>
<div class="footer">Generated {{generated_at}} by Pharmy. You receive this mail as an administrator of {{tenant_name}}.</div>
</body>
</html>
"#;

const DIGEST_TEXT: &str = r#"Stock digest for {{tenant_name}}
{{#if alerts}}
Low stock: {{summary.total_alerts}} products ({{summary.high_priority}} high priority, {{summary.out_of_stock}} out of stock)
{{#each alerts}}- [{{priority}}] {{product_name}} ({{sku}}): {{current_stock}} {{unit}} left, reorder level {{reorder_level}}, suggested order {{suggested_quantity}}
{{/each}}{{#if more_alerts}}...and {{more_alerts}} more
{{/if}}{{/if}}{{#if expiring}}
Expiring within {{warning_days}} days: {{expiring_units}} units
{{#each expiring}}- {{product_name}} batch {{batch_number}} ({{supplier_name}}): {{quantity}} units, expires {{expiry_date}} ({{days_to_expiry}} days)
{{/each}}{{#if more_expiring}}...and {{more_expiring}} more
{{/if}}{{/if}}
Reorder suggestions have been refreshed and are available in Pharmy.

---
Generated {{generated_at}} by Pharmy.
"#;

/// Template engine
pub struct TemplateEngine {
    html: Handlebars<'static>,
    text: Handlebars<'static>,
}

impl TemplateEngine {
    pub fn new() -> Result<Self> {
        let mut html = Handlebars::new();
        html.set_strict_mode(true);
        register(&mut html, LOW_STOCK_DIGEST, DIGEST_HTML)?;

        let mut text = Handlebars::new();
        text.set_strict_mode(true);
        text.register_escape_fn(no_escape);
        register(&mut text, &subject_name(LOW_STOCK_DIGEST), DIGEST_SUBJECT)?;
        register(&mut text, LOW_STOCK_DIGEST, DIGEST_TEXT)?;

        Ok(Self { html, text })
    }

    /// Render template with variables
    pub fn render<T: Serialize>(&self, template_id: &str, data: &T) -> Result<RenderedEmail> {
        let subject = self
            .text
            .render(&subject_name(template_id), data)
            .context("Failed to render subject")?;

        let body_html = self
            .html
            .render(template_id, data)
            .context("Failed to render HTML body")?;

        let body_text = self
            .text
            .render(template_id, data)
            .context("Failed to render text body")?;

        Ok(RenderedEmail {
            subject,
            body_html,
            body_text,
        })
    }
}

fn subject_name(template_id: &str) -> String {
    format!("{}.subject", template_id)
}

fn register(registry: &mut Handlebars<'static>, name: &str, source: &str) -> Result<()> {
    registry
        .register_template_string(name, source)
        .map_err(|e| anyhow!("Invalid template {}: {}", name, e))
}
