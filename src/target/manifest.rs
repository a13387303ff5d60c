use std::collections::BTreeMap;
use std::fs;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::error::TaskError;
use crate::target::Target;

/// IaC file emitter that collects resources into one JSON manifest.
///
/// Render methods serialize the desired end state of their resource here;
/// nothing touches the filesystem until [`Target::finish`] writes the
/// manifest in one deterministic pass. Keys are `kind/name`, so the output
/// is stable regardless of the order sibling tasks rendered in.
pub struct ManifestTarget {
    dir: Utf8PathBuf,
    resources: Mutex<BTreeMap<String, serde_json::Value>>,
}

impl ManifestTarget {
    pub fn new(dir: impl AsRef<Utf8Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            resources: Mutex::new(BTreeMap::new()),
        }
    }

    /// Record the desired end state of one resource.
    pub fn render_resource<S: Serialize>(
        &self,
        kind: &str,
        name: &str,
        body: &S,
    ) -> Result<(), TaskError> {
        let value = serde_json::to_value(body)
            .map_err(|err| TaskError::validation(format!("cannot serialize {kind}/{name}: {err}")))?;

        let mut resources = self.resources.lock().unwrap();
        resources.insert(format!("{kind}/{name}"), value);
        Ok(())
    }

    /// Number of resources recorded so far.
    pub fn len(&self) -> usize {
        self.resources.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.lock().unwrap().is_empty()
    }
}

impl Target for ManifestTarget {
    fn name(&self) -> &'static str {
        "manifest"
    }

    fn finish(&self) -> anyhow::Result<()> {
        let resources = self.resources.lock().unwrap();
        let doc = serde_json::json!({ "resources": *resources });

        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join("resources.json");
        let mut text = serde_json::to_string_pretty(&doc)?;
        text.push('\n');
        fs::write(&path, text)?;

        tracing::info!("wrote {} resources to {path}", resources.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Body {
        cidr: &'static str,
    }

    #[test]
    fn writes_deterministic_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(dir.path()).unwrap();

        let target = ManifestTarget::new(dir);
        // Insertion order is not output order.
        target
            .render_resource("Subnet", "b", &Body { cidr: "10.0.1.0/24" })
            .unwrap();
        target
            .render_resource("Network", "a", &Body { cidr: "10.0.0.0/16" })
            .unwrap();
        target.finish().unwrap();

        let text = fs::read_to_string(dir.join("resources.json")).unwrap();
        assert!(text.find("Network/a").unwrap() < text.find("Subnet/b").unwrap());

        let doc: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(doc["resources"]["Network/a"]["cidr"], "10.0.0.0/16");
    }

    #[test]
    fn rerender_overwrites_entry() {
        let target = ManifestTarget::new("unused");
        target
            .render_resource("Subnet", "a", &Body { cidr: "10.0.0.0/24" })
            .unwrap();
        target
            .render_resource("Subnet", "a", &Body { cidr: "10.0.1.0/24" })
            .unwrap();
        assert_eq!(target.len(), 1);
    }
}
