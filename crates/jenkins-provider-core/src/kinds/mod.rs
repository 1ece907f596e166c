//! Concrete resource kinds.

mod folder;
mod job;
mod node;

pub use folder::{DEFAULT_FOLDER_CONFIG, Folder, FolderParameters};
pub use job::{Job, JobParameters};
pub use node::{Node, NodeParameters, normalize_labels};

/// Normalize a Jenkins `config.xml` document for comparison.
///
/// Jenkins rewrites submitted documents: it prepends an XML declaration and re-indents. Both are
/// dropped here along with whitespace that sits between two tags.
pub fn normalize_xml(xml: &str) -> String {
    let mut body = xml.trim();
    if let Some(rest) = body.strip_prefix("<?xml")
        && let Some(end) = rest.find("?>")
    {
        body = rest[end + 2..].trim();
    }

    let mut out = String::with_capacity(body.len());
    let mut pending_ws = String::new();
    for ch in body.chars() {
        if ch.is_whitespace() {
            pending_ws.push(ch);
            continue;
        }
        if !pending_ws.is_empty() {
            if !(out.ends_with('>') && ch == '<') {
                out.push_str(&pending_ws);
            }
            pending_ws.clear();
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_xml_drops_declaration_and_indent() {
        let submitted = "<project><description>hi there</description></project>";
        let returned = "<?xml version='1.1' encoding='UTF-8'?>\n<project>\n  <description>hi there</description>\n</project>\n";
        assert_eq!(normalize_xml(submitted), normalize_xml(returned));
    }

    #[test]
    fn test_normalize_xml_keeps_text_whitespace() {
        assert_ne!(
            normalize_xml("<d>a b</d>"),
            normalize_xml("<d>ab</d>")
        );
    }
}
