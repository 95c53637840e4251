//! Askama template structs. Templates live in the crate's `templates/` directory.

use askama::Template;

/// Upload form.
#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate<'a> {
    pub messages: &'a [String],
    /// Comma-separated `accept` list for the file input, e.g. `.pdf,.png`.
    pub accept: &'a str,
    pub max_upload_mb: usize,
    pub service_ready: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_messages_and_limits() {
        let messages = vec!["Error during image processing: <boom>".to_string()];
        let html = IndexTemplate {
            messages: &messages,
            accept: ".pdf,.png",
            max_upload_mb: 50,
            service_ready: false,
        }
        .render()
        .unwrap();

        assert!(html.contains("&lt;boom&gt;"));
        assert!(html.contains(r#"accept=".pdf,.png""#));
        assert!(html.contains("50 MB"));
        assert!(html.contains("not available"));
    }
}
