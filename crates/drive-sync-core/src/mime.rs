//! MIME types for uploads, chosen by file extension.

pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

pub fn mime_type_for(path: &str) -> &'static str {
    let extension = crate::entry::file_name(path)
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("md") | Some("markdown") => "text/markdown",
        Some("txt") => "text/plain",
        Some("csv") => "text/csv",
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("js") => "text/javascript",
        Some("json") | Some("canvas") => "application/json",
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("webp") => "image/webp",
        Some("mp3") => "audio/mpeg",
        Some("mp4") => "video/mp4",
        _ => DEFAULT_MIME_TYPE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markdown() {
        assert_eq!(mime_type_for("notes/a.md"), "text/markdown");
        assert_eq!(mime_type_for("A.MD"), "text/markdown");
    }

    #[test]
    fn test_canvas_is_json() {
        assert_eq!(mime_type_for("board.canvas"), "application/json");
    }

    #[test]
    fn test_unknown_and_missing_extension() {
        assert_eq!(mime_type_for("archive.xyz"), DEFAULT_MIME_TYPE);
        assert_eq!(mime_type_for("Makefile"), DEFAULT_MIME_TYPE);
        // A dot in a folder name is not an extension
        assert_eq!(mime_type_for("v1.2/README"), DEFAULT_MIME_TYPE);
    }
}
