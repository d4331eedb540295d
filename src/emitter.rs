//! Output-document emitter.
//!
//! Serialization here is deliberately plain: an indenting writer with
//! escaping, fed from already-ordered projection records. The document is
//! staged to a temporary file beside the destination and persisted once it
//! is complete, so a failed run never leaves a truncated document behind.
use crate::defaults::{ConfigElement, ConfigSection, ADD_IF_MISSING_ATTR, REQUIRE_EXISTING_ATTR};
use crate::projection::{ArchiveRef, FeatureProjection};
use anyhow::{anyhow, Context, Result};
use std::io::Write;
use std::path::Path;

/// Writes the complete feature-list document.
pub fn write_feature_list(
    output: &Path,
    encoding: &str,
    projections: &[FeatureProjection],
    sections: &[ConfigSection],
) -> Result<()> {
    let mut writer = XmlWriter::new(encoding);
    writer.open("featureList", &[]);
    for projection in projections {
        write_projection(&mut writer, projection);
    }
    write_default_configuration(&mut writer, sections);
    writer.close("featureList");

    // Stage in the destination directory so persist is an atomic rename.
    let directory = output
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut staged =
        tempfile::NamedTempFile::new_in(directory).context("stage output document")?;
    staged
        .write_all(writer.finish().as_bytes())
        .context("write output document")?;
    staged
        .persist(output)
        .map_err(|err| anyhow!("persist {}: {}", output.display(), err.error))?;
    tracing::info!(output = %output.display(), "feature list written");
    Ok(())
}

fn write_projection(writer: &mut XmlWriter, projection: &FeatureProjection) {
    let element = projection.shape.element_name();
    let name = projection
        .short_name
        .as_deref()
        .unwrap_or(&projection.symbolic_name);
    writer.open(element, &[("name", name)]);

    writer.text_element("symbolicName", &projection.symbolic_name);
    if let Some(display_name) = &projection.display_name {
        writer.text_element("displayName", display_name);
    }
    if let Some(description) = &projection.description {
        writer.text_element("description", description);
    }
    if let Some(category) = &projection.category {
        writer.text_element("category", category);
    }
    if projection.singleton {
        writer.text_element("singleton", "true");
    }
    if projection.superseded {
        writer.text_element("superseded", "true");
        for superseding in &projection.superseded_by {
            writer.text_element("supersededBy", superseding);
        }
    }
    for filter in &projection.provision_capability {
        writer.text_element("provisionCapability", filter);
    }
    for enabled in &projection.enables {
        writer.text_element("enables", enabled);
    }
    write_archives(writer, "apiJar", &projection.api_archives);
    write_archives(writer, "spiJar", &projection.spi_archives);
    for element_name in &projection.config_elements {
        writer.text_element("configElement", element_name);
    }
    for include in &projection.includes {
        let mut attrs = vec![("symbolicName", include.symbolic_name.as_str())];
        if let Some(short_name) = &include.short_name {
            attrs.push(("shortName", short_name));
        }
        let tolerates = include.tolerates.join(",");
        if !tolerates.is_empty() {
            attrs.push(("tolerates", &tolerates));
        }
        writer.empty("include", &attrs);
    }
    for label in &projection.compatible_runtimes {
        writer.text_element("compatibleRuntime", label);
    }

    writer.close(element);
}

fn write_archives(writer: &mut XmlWriter, element: &str, archives: &[ArchiveRef]) {
    for archive in archives {
        let mut attrs = vec![("location", archive.location.as_str())];
        if let Some(symbolic_name) = &archive.symbolic_name {
            attrs.push(("symbolicName", symbolic_name));
        }
        if let Some(min_runtime) = &archive.min_runtime {
            attrs.push(("minRuntime", min_runtime));
        }
        writer.empty(element, &attrs);
    }
}

fn write_default_configuration(writer: &mut XmlWriter, sections: &[ConfigSection]) {
    writer.open("defaultConfiguration", &[]);
    for section in sections {
        let providing = section.providing_features_attr();
        let mut attrs = vec![("providingFeatures", providing.as_str())];
        if section.element.require_existing {
            attrs.push((REQUIRE_EXISTING_ATTR, "true"));
        }
        if section.element.add_if_missing {
            attrs.push((ADD_IF_MISSING_ATTR, "true"));
        }
        write_config_element(writer, &section.element, Some(&attrs));
    }
    writer.close("defaultConfiguration");
}

fn write_config_element(
    writer: &mut XmlWriter,
    element: &ConfigElement,
    extra_attrs: Option<&[(&str, &str)]>,
) {
    let mut attrs: Vec<(&str, &str)> = Vec::new();
    if let Some(extra) = extra_attrs {
        attrs.extend_from_slice(extra);
    }
    for (key, value) in &element.attributes {
        attrs.push((key, value));
    }
    if element.children.is_empty() && element.text.is_none() {
        writer.empty(&element.name, &attrs);
        return;
    }
    writer.open(&element.name, &attrs);
    if let Some(text) = &element.text {
        writer.text_line(text);
    }
    for child in &element.children {
        write_config_element(writer, child, None);
    }
    writer.close(&element.name);
}

/// Minimal indenting XML writer.
struct XmlWriter {
    out: String,
    depth: usize,
}

impl XmlWriter {
    fn new(encoding: &str) -> Self {
        let mut out = String::new();
        out.push_str(&format!(
            "<?xml version=\"1.0\" encoding=\"{}\"?>\n",
            escape_attr(encoding)
        ));
        XmlWriter { out, depth: 0 }
    }

    fn open(&mut self, name: &str, attrs: &[(&str, &str)]) {
        self.push_tag(name, attrs, false);
        self.depth += 1;
    }

    fn empty(&mut self, name: &str, attrs: &[(&str, &str)]) {
        self.push_tag(name, attrs, true);
    }

    fn close(&mut self, name: &str) {
        self.depth = self.depth.saturating_sub(1);
        self.indent();
        self.out.push_str(&format!("</{name}>\n"));
    }

    fn text_element(&mut self, name: &str, text: &str) {
        self.indent();
        self.out
            .push_str(&format!("<{name}>{}</{name}>\n", escape_text(text)));
    }

    fn text_line(&mut self, text: &str) {
        self.indent();
        self.out.push_str(&escape_text(text));
        self.out.push('\n');
    }

    fn finish(self) -> String {
        self.out
    }

    fn push_tag(&mut self, name: &str, attrs: &[(&str, &str)], self_closing: bool) {
        self.indent();
        self.out.push('<');
        self.out.push_str(name);
        for (key, value) in attrs {
            self.out
                .push_str(&format!(" {key}=\"{}\"", escape_attr(value)));
        }
        self.out.push_str(if self_closing { "/>\n" } else { ">\n" });
    }

    fn indent(&mut self) {
        for _ in 0..self.depth {
            self.out.push_str("  ");
        }
    }
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attr(text: &str) -> String {
    escape_text(text).replace('"', "&quot;")
}
