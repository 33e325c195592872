//! Server-rendered HTML pages for the `/.wru` endpoints.

use std::sync::Arc;

use wru_auth::UserRecord;

use crate::handlers::account::SessionView;

const SHARED_STYLES: &str = r#"
:root {
    --surface: #f6f7f9;
    --card: #ffffff;
    --border: #d8dce3;
    --text: #1f2430;
    --text-dim: #6b7280;
    --accent: #2f5fd0;
    --danger: #c0392b;
    --radius: 8px;
}

* { margin: 0; padding: 0; box-sizing: border-box; }

body {
    font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif;
    background: var(--surface);
    color: var(--text);
    min-height: 100vh;
    display: flex;
    justify-content: center;
    align-items: center;
    line-height: 1.5;
}

.container { width: 100%; max-width: 480px; padding: 1rem; }

.card {
    background: var(--card);
    border: 1px solid var(--border);
    border-radius: var(--radius);
    padding: 1.5rem;
}

.card h1 { font-size: 1.25rem; margin-bottom: 1rem; }

.provider-list { list-style: none; }

.provider-list li { margin-bottom: 0.75rem; }

.provider-list a, button {
    display: block;
    width: 100%;
    padding: 0.6rem 1rem;
    text-align: center;
    text-decoration: none;
    color: #fff;
    background: var(--accent);
    border: none;
    border-radius: var(--radius);
    font-size: 1rem;
    cursor: pointer;
}

button.danger { background: var(--danger); }

select {
    width: 100%;
    padding: 0.5rem;
    margin-bottom: 1rem;
    border: 1px solid var(--border);
    border-radius: var(--radius);
}

table { width: 100%; border-collapse: collapse; margin-bottom: 1rem; }

th, td {
    text-align: left;
    padding: 0.4rem 0.5rem;
    border-bottom: 1px solid var(--border);
    font-size: 0.875rem;
}

.dim { color: var(--text-dim); font-size: 0.8rem; }

dl dt { font-weight: 600; margin-top: 0.5rem; }
dl dd { color: var(--text-dim); }
"#;

/// Escapes text for inclusion in HTML.
#[must_use]
pub fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

fn html_page(title: &str, content: &str) -> String {
    let mut html = String::with_capacity(content.len() + SHARED_STYLES.len() + 512);
    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    html.push_str("    <meta charset=\"UTF-8\">\n");
    html.push_str("    <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    html.push_str("    <title>");
    html.push_str(&html_escape(title));
    html.push_str(" - wru</title>\n    <style>");
    html.push_str(SHARED_STYLES);
    html.push_str("</style>\n</head>\n<body>\n    <div class=\"container\">\n");
    html.push_str(content);
    html.push_str("\n    </div>\n</body>\n</html>");
    html
}

/// The login chooser listing the configured identity providers.
#[must_use]
pub fn render_login_page(providers: &[&str]) -> String {
    let mut content = String::from("<div class=\"card\">\n<h1>Sign in</h1>\n");
    if providers.is_empty() {
        content.push_str("<p class=\"dim\">No identity provider is configured.</p>\n");
    } else {
        content.push_str("<ul class=\"provider-list\">\n");
        for tag in providers {
            content.push_str("<li><a href=\"/.wru/login/");
            content.push_str(&html_escape(tag));
            content.push_str("\">Sign in with ");
            content.push_str(&html_escape(&display_name(tag)));
            content.push_str("</a></li>\n");
        }
        content.push_str("</ul>\n");
    }
    content.push_str("</div>");
    html_page("Sign in", &content)
}

fn display_name(tag: &str) -> String {
    match tag {
        "twitter" => "Twitter".to_string(),
        "github" => "GitHub".to_string(),
        "oidc" => "OpenID Connect".to_string(),
        other => other.to_string(),
    }
}

/// The dev-mode login form listing the registered users.
#[must_use]
pub fn render_debug_login_page(users: &[Arc<UserRecord>]) -> String {
    let mut content = String::from(
        "<div class=\"card\">\n<h1>Debug sign in</h1>\n\
         <form method=\"post\" action=\"/.wru/login\">\n<select name=\"userid\">\n",
    );
    for user in users {
        content.push_str("<option value=\"");
        content.push_str(&html_escape(&user.user_id));
        content.push_str("\">");
        content.push_str(&html_escape(&user.display_name));
        content.push_str(" (");
        content.push_str(&html_escape(&user.user_id));
        content.push_str(")</option>\n");
    }
    content.push_str("</select>\n<button type=\"submit\">Sign in</button>\n</form>\n</div>");
    html_page("Debug sign in", &content)
}

/// The current user's profile page.
#[must_use]
pub fn render_user_page(user: &UserRecord) -> String {
    let mut content = String::from("<div class=\"card\">\n<h1>");
    content.push_str(&html_escape(&user.display_name));
    content.push_str("</h1>\n<dl>\n");
    for (label, value) in [
        ("User ID", user.user_id.as_str()),
        ("Email", user.email.as_str()),
        ("Organization", user.organization.as_str()),
    ] {
        content.push_str("<dt>");
        content.push_str(label);
        content.push_str("</dt><dd>");
        content.push_str(&html_escape(value));
        content.push_str("</dd>\n");
    }
    content.push_str("<dt>Scopes</dt><dd>");
    content.push_str(&html_escape(&user.scope_string()));
    content.push_str("</dd>\n</dl>\n<a href=\"/.wru/logout\">Sign out</a>\n</div>");
    html_page("Account", &content)
}

/// The device session list with per-session revoke buttons.
#[must_use]
pub fn render_sessions_page(sessions: &[SessionView]) -> String {
    let mut content = String::from(
        "<div class=\"card\">\n<h1>Sessions</h1>\n<table>\n\
         <tr><th>Device</th><th>Location</th><th>Signed in</th><th></th></tr>\n",
    );
    for session in sessions {
        content.push_str("<tr><td>");
        content.push_str(&html_escape(&format!(
            "{} on {}",
            session.browser, session.os
        )));
        if session.current {
            content.push_str(" <span class=\"dim\">(this device)</span>");
        }
        content.push_str("</td><td>");
        content.push_str(&html_escape(&session.location));
        content.push_str("</td><td class=\"dim\">");
        content.push_str(&html_escape(&session.login_at));
        content.push_str("</td><td>");
        if !session.current {
            content.push_str("<form method=\"post\" action=\"/.wru/user/sessions/");
            content.push_str(&html_escape(&session.id));
            content.push_str("/logout\"><button class=\"danger\" type=\"submit\">Revoke</button></form>");
        }
        content.push_str("</td></tr>\n");
    }
    content.push_str("</table>\n<a href=\"/.wru/user\">Back</a>\n</div>");
    html_page("Sessions", &content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_escape() {
        assert_eq!(
            html_escape("<script>\"a\" & 'b'</script>"),
            "&lt;script&gt;&quot;a&quot; &amp; &#x27;b&#x27;&lt;/script&gt;"
        );
    }

    #[test]
    fn test_login_page_lists_providers() {
        let page = render_login_page(&["github", "oidc"]);
        assert!(page.contains("/.wru/login/github"));
        assert!(page.contains("Sign in with GitHub"));
        assert!(page.contains("Sign in with OpenID Connect"));
    }

    #[test]
    fn test_user_page_escapes_values() {
        let user = UserRecord {
            user_id: "u<1>".into(),
            display_name: "A & B".into(),
            email: "a@b.c".into(),
            organization: String::new(),
            scopes: vec!["login".into()],
            federated_accounts: Vec::new(),
        };
        let page = render_user_page(&user);
        assert!(page.contains("A &amp; B"));
        assert!(page.contains("u&lt;1&gt;"));
        assert!(!page.contains("u<1>"));
    }
}
