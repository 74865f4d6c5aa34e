//! HTML pages served by the proxy itself.
//!
//! Every interpolated value goes through [`escape`].

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};

/// Escapes text for use in HTML content and quoted attributes.
#[must_use]
pub fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&#34;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

const STYLE: &str = "body{font-family:sans-serif;margin:3em auto;max-width:30em;text-align:center}\
form{margin:1em 0}input{display:block;margin:.5em auto;padding:.4em;width:16em}\
button{padding:.5em 1.5em}";

fn layout(title: &str, content: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>{title}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n{content}\n</body>\n</html>\n",
        title = escape(title),
    )
}

/// An error page with a link back to sign-in.
pub fn error_page(status: StatusCode, title: &str, message: &str, proxy_prefix: &str) -> Response {
    tracing::info!(status = status.as_u16(), title, message, "error page");
    let heading = format!("{} {title}", status.as_u16());
    let content = format!(
        "<h2>{heading}</h2>\n<p>{message}</p>\n<hr>\n<p><a href=\"{prefix}/sign_in\">Sign In</a></p>",
        heading = escape(&heading),
        message = escape(message),
        prefix = escape(proxy_prefix),
    );
    (status, Html(layout(&heading, &content))).into_response()
}

/// Inputs for the sign-in page.
#[derive(Debug, Clone)]
pub struct SignInPage<'a> {
    pub provider_name: &'a str,
    pub redirect: &'a str,
    pub proxy_prefix: &'a str,
    pub show_htpasswd_form: bool,
}

impl SignInPage<'_> {
    /// Renders the page with `status`.
    pub fn render(&self, status: StatusCode) -> Response {
        let prefix = escape(self.proxy_prefix);
        let redirect = escape(self.redirect);
        let mut content = format!(
            "<form method=\"GET\" action=\"{prefix}/start\">\n\
             <input type=\"hidden\" name=\"rd\" value=\"{redirect}\">\n\
             <button type=\"submit\">Sign in with {provider}</button>\n</form>",
            provider = escape(self.provider_name),
        );
        if self.show_htpasswd_form {
            content.push_str(&format!(
                "\n<hr>\n<form method=\"POST\" action=\"{prefix}/sign_in\">\n\
                 <input type=\"hidden\" name=\"rd\" value=\"{redirect}\">\n\
                 <input type=\"text\" name=\"username\" placeholder=\"Username\" autocomplete=\"username\">\n\
                 <input type=\"password\" name=\"password\" placeholder=\"Password\" autocomplete=\"current-password\">\n\
                 <button type=\"submit\">Sign In</button>\n</form>"
            ));
        }
        (status, Html(layout("Sign In", &content))).into_response()
    }
}

pub const ROBOTS_TXT: &str = "User-agent: *\nDisallow: /";

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        String::from_utf8(bytes.to_vec()).expect("utf-8")
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape(r#"<a href="x">'&'</a>"#),
            "&lt;a href=&#34;x&#34;&gt;&#39;&amp;&#39;&lt;/a&gt;"
        );
    }

    #[tokio::test]
    async fn error_page_escapes_message() {
        let response = error_page(
            StatusCode::FORBIDDEN,
            "Permission Denied",
            "<script>alert(1)</script>",
            "/oauth2",
        );
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let html = body(response).await;
        assert!(html.contains("403 Permission Denied"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>"));
        assert!(html.contains("href=\"/oauth2/sign_in\""));
    }

    #[tokio::test]
    async fn sign_in_page_offers_form_only_when_enabled() {
        let page = SignInPage {
            provider_name: "GitLab",
            redirect: "/app?x=\"1\"",
            proxy_prefix: "/oauth2",
            show_htpasswd_form: false,
        };
        let html = body(page.render(StatusCode::OK)).await;
        assert!(html.contains("Sign in with GitLab"));
        assert!(html.contains("action=\"/oauth2/start\""));
        assert!(html.contains("value=\"/app?x=&#34;1&#34;\""));
        assert!(!html.contains("type=\"password\""));

        let html = body(
            SignInPage {
                show_htpasswd_form: true,
                ..page
            }
            .render(StatusCode::OK),
        )
        .await;
        assert!(html.contains("type=\"password\""));
    }
}
