// src/template/defaults.rs
//! Built-in templates used when a task or the auto-push config names none.

/// Subject for email digests.
pub const EMAIL_SUBJECT: &str = "News digest - {{.Date}}";

/// Title for push-channel digests.
pub const DIGEST_SUBJECT: &str = "News digest - {{.Count}} items";

/// HTML email body.
pub const EMAIL_BODY: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<style>
  body { font-family: -apple-system, 'Segoe UI', Roboto, sans-serif; background: #f4f4f6; margin: 0; padding: 20px; }
  .wrap { max-width: 680px; margin: 0 auto; background: #fff; border-radius: 10px; overflow: hidden; }
  .head { background: #3f4a8a; color: #fff; padding: 28px; text-align: center; }
  .head h1 { margin: 0; font-size: 22px; }
  .head p { margin: 8px 0 0; opacity: .85; }
  .item { border-bottom: 1px solid #eee; padding: 18px 24px; }
  .item:last-child { border-bottom: none; }
  .item h2 { font-size: 17px; margin: 0 0 8px; }
  .item h2 a { color: #3f4a8a; text-decoration: none; }
  .meta { font-size: 12px; color: #999; margin-bottom: 8px; }
  .tag { background: #eef; padding: 1px 8px; border-radius: 4px; margin-right: 10px; }
  .summary { color: #555; line-height: 1.7; margin: 0; }
  .foot { background: #fafafa; padding: 16px; text-align: center; color: #999; font-size: 12px; }
</style>
</head>
<body>
<div class="wrap">
  <div class="head">
    <h1>News digest</h1>
    <p>{{.Date}} &middot; {{.Count}} items</p>
  </div>
  {{- range .News}}
  <div class="item">
    <h2><a href="{{.URL}}" target="_blank">{{.DisplayTitle}}</a></h2>
    <div class="meta"><span class="tag">{{.Category}}</span>Source: {{.Source}}</div>
    {{- if .DisplaySummary}}
    <p class="summary">{{.DisplaySummary}}</p>
    {{- end}}
  </div>
  {{- end}}
  <div class="foot">Generated {{.Generated}}</div>
</div>
</body>
</html>
"#;

/// Markdown digest for ntfy / webhook channels. Lists the first ten items with short
/// summaries, which keeps the message under ntfy's 4096-byte limit.
pub const DIGEST_BODY: &str = r#"{{range .Shown -}}
**{{.Index}}. {{.DisplayTitle}}**
{{if .ShortSummary}}{{.ShortSummary}}
{{end}}[Read more]({{.URL}})

{{end}}{{if .More}}...and {{.More}} more{{end}}"#;
