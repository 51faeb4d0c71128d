//! HTML pages: the status page and the Swagger UI shell.

use maud::{DOCTYPE, Markup, PreEscaped, html};

use crate::build_info;

const TITLE: &str = "ClamAV REST service";
const SWAGGER_DIST: &str = "https://unpkg.com/swagger-ui-dist@5";

const STYLE: &str = "\
body { font-family: sans-serif; margin: 2em auto; max-width: 60em; }
pre { background: #f4f4f4; padding: 1em; overflow-x: auto; }
dt { font-weight: bold; margin-top: 1em; }";

fn layout(title: &str, head: Markup, body: Markup) -> String {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="utf-8";
                title { (title) }
                (head)
            }
            body { (body) }
        }
    }
    .into_string()
}

/// The status page shown at `/`. Daemon text is escaped.
pub fn index(pong: &str, version: &str, stats: &str) -> String {
    layout(
        TITLE,
        html! { style { (PreEscaped(STYLE)) } },
        html! {
            h1 { (TITLE) }
            dl {
                dt { "Ping" } dd { (pong) }
                dt { "Version" } dd { (version) }
                dt { "Stats" } dd { pre { (stats) } }
            }
            p { a href="/swagger-ui" { "API documentation" } }
            footer { small { "clamrest " (build_info::version_string()) } }
        },
    )
}

/// Swagger UI page rendering the document served at `doc_url`.
pub fn swagger_ui(doc_url: &str) -> String {
    // A JSON string is a valid JS string literal.
    let url = serde_json::Value::from(doc_url).to_string();
    let init = format!(
        "window.onload = () => {{ window.ui = SwaggerUIBundle({{ url: {url}, dom_id: \"#swagger-ui\" }}); }};"
    );
    layout(
        &format!("{TITLE} - API"),
        html! { link rel="stylesheet" href={ (SWAGGER_DIST) "/swagger-ui.css" }; },
        html! {
            div id="swagger-ui" {}
            script src={ (SWAGGER_DIST) "/swagger-ui-bundle.js" } {}
            script { (PreEscaped(init)) }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_shows_daemon_text() {
        let page = index("PONG", "ClamAV 1.4.2", "POOLS: 1");
        assert!(page.starts_with("<!DOCTYPE html>"));
        assert!(page.contains("<dd>PONG</dd>"));
        assert!(page.contains("<pre>POOLS: 1</pre>"));
        assert!(page.contains(&build_info::version_string()));
    }

    #[test]
    fn test_index_escapes_daemon_text() {
        let page = index("PONG", r#"<b>"Tom" & Jerry</b>"#, "POOLS: 1\n<script>END");
        assert!(page.contains("&lt;script&gt;END"));
        assert!(!page.contains("<script>END"));
        assert!(page.contains("&lt;b&gt;&quot;Tom&quot; &amp; Jerry&lt;/b&gt;"));
    }

    #[test]
    fn test_swagger_ui_points_at_doc() {
        let page = swagger_ui("/api/v1/doc");
        assert!(page.contains(r#"url: "/api/v1/doc""#));
        assert!(page.contains(r#"src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js""#));
    }
}
