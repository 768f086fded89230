use std::path::Path;

/// Editor language mode for a file, derived from its extension
pub fn language_for_path(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("ts" | "tsx" | "mts" | "cts") => "typescript",
        Some("js" | "jsx" | "mjs" | "cjs") => "javascript",
        Some("html" | "htm") => "html",
        Some("scss" | "sass") => "scss",
        Some("css") => "css",
        Some("json") => "json",
        Some("md" | "markdown") => "markdown",
        _ => "plaintext",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_for_path() {
        assert_eq!(language_for_path("src/app/app.component.ts"), "typescript");
        assert_eq!(language_for_path("src/App.TSX"), "typescript");
        assert_eq!(language_for_path("src/index.js"), "javascript");
        assert_eq!(language_for_path("src/styles.scss"), "scss");
        assert_eq!(language_for_path("package.json"), "json");
        assert_eq!(language_for_path("README.md"), "markdown");
        assert_eq!(language_for_path("Dockerfile"), "plaintext");
    }
}
