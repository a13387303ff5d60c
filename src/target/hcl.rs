use std::fs;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::TaskError;
use crate::target::Target;

/// A value in a generated HCL attribute: either a quoted string or a
/// reference to an attribute of another generated resource.
///
/// References are how dependency identifiers stay resolvable in emitted
/// code: the dependent block points at `type.name.attr` instead of an ID
/// that only exists after a real apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    String(String),
    Reference {
        resource_type: String,
        name: String,
        attr: &'static str,
    },
}

impl Literal {
    pub fn string(value: impl Into<String>) -> Self {
        Literal::String(value.into())
    }

    pub fn reference(
        resource_type: impl Into<String>,
        name: impl Into<String>,
        attr: &'static str,
    ) -> Self {
        Literal::Reference {
            resource_type: resource_type.into(),
            name: name.into(),
            attr,
        }
    }
}

impl std::fmt::Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::String(s) => write!(f, "{s:?}"),
            Literal::Reference {
                resource_type,
                name,
                attr,
            } => write!(f, "{resource_type}.{name}.{attr}"),
        }
    }
}

/// One attribute value in an emitted block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attr {
    Str(String),
    Lit(Literal),
    Int(i64),
    Bool(bool),
    List(Vec<Attr>),
}

impl Attr {
    fn write(&self, out: &mut String) {
        match self {
            Attr::Str(s) => out.push_str(&format!("{s:?}")),
            Attr::Lit(lit) => out.push_str(&lit.to_string()),
            Attr::Int(n) => out.push_str(&n.to_string()),
            Attr::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Attr::List(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.write(out);
                }
                out.push(']');
            }
        }
    }
}

impl From<&str> for Attr {
    fn from(value: &str) -> Self {
        Attr::Str(value.to_string())
    }
}

impl From<String> for Attr {
    fn from(value: String) -> Self {
        Attr::Str(value)
    }
}

impl From<Literal> for Attr {
    fn from(value: Literal) -> Self {
        Attr::Lit(value)
    }
}

#[derive(Debug, Clone)]
struct Block {
    resource_type: String,
    name: String,
    attrs: Vec<(&'static str, Attr)>,
}

/// IaC file emitter producing HCL resource blocks.
///
/// Blocks accumulate in memory and are written to `main.tf` on
/// [`Target::finish`], sorted by (type, name) so the output is independent
/// of wave timing.
pub struct HclTarget {
    dir: Utf8PathBuf,
    blocks: Mutex<Vec<Block>>,
}

impl HclTarget {
    pub fn new(dir: impl AsRef<Utf8Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            blocks: Mutex::new(Vec::new()),
        }
    }

    /// Record one resource block. Attribute order is preserved as given.
    ///
    /// `name` must be a valid HCL identifier; names starting with a digit
    /// are the catalog's responsibility to prefix.
    pub fn render_resource(
        &self,
        resource_type: impl Into<String>,
        name: impl Into<String>,
        attrs: Vec<(&'static str, Attr)>,
    ) -> Result<(), TaskError> {
        let name = name.into();
        if name.is_empty() {
            return Err(TaskError::validation("resource block name is empty"));
        }

        let mut blocks = self.blocks.lock().unwrap();
        blocks.push(Block {
            resource_type: resource_type.into(),
            name,
            attrs,
        });
        Ok(())
    }

    fn render(&self) -> String {
        let mut blocks = self.blocks.lock().unwrap().clone();
        blocks.sort_by(|a, b| {
            (a.resource_type.as_str(), a.name.as_str())
                .cmp(&(b.resource_type.as_str(), b.name.as_str()))
        });

        let mut out = String::new();
        for (i, block) in blocks.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(&format!(
                "resource {:?} {:?} {{\n",
                block.resource_type, block.name
            ));
            for (key, attr) in &block.attrs {
                out.push_str(&format!("  {key} = "));
                attr.write(&mut out);
                out.push('\n');
            }
            out.push_str("}\n");
        }
        out
    }
}

impl Target for HclTarget {
    fn name(&self) -> &'static str {
        "hcl"
    }

    fn finish(&self) -> anyhow::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join("main.tf");
        fs::write(&path, self.render())?;

        tracing::info!("wrote {path}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_sorted_blocks_with_references() {
        let target = HclTarget::new("unused");
        target
            .render_resource(
                "aws_route",
                "route-main",
                vec![
                    (
                        "route_table_id",
                        Literal::reference("aws_route_table", "main", "id").into(),
                    ),
                    ("destination_cidr_block", "0.0.0.0/0".into()),
                ],
            )
            .unwrap();
        target
            .render_resource("aws_route_table", "main", vec![("vpc_id", "vpc-123".into())])
            .unwrap();

        let text = target.render();
        assert!(text.starts_with("resource \"aws_route\" \"route-main\" {\n"));
        assert!(text.contains("  route_table_id = aws_route_table.main.id\n"));
        assert!(text.contains("  destination_cidr_block = \"0.0.0.0/0\"\n"));
        assert!(text.contains("resource \"aws_route_table\" \"main\" {\n"));
    }

    #[test]
    fn rejects_empty_block_name() {
        let target = HclTarget::new("unused");
        assert!(target.render_resource("aws_vpc", "", vec![]).is_err());
    }

    #[test]
    fn finish_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(dir.path()).unwrap();

        let target = HclTarget::new(dir);
        target
            .render_resource("aws_vpc", "main", vec![("cidr_block", "10.0.0.0/16".into())])
            .unwrap();
        target.finish().unwrap();

        let text = fs::read_to_string(dir.join("main.tf")).unwrap();
        assert!(text.contains("cidr_block = \"10.0.0.0/16\""));
    }

    #[test]
    fn list_attrs_render_inline() {
        let mut out = String::new();
        Attr::List(vec![Attr::Int(1), Attr::Bool(true), "x".into()]).write(&mut out);
        assert_eq!(out, "[1, true, \"x\"]");
    }
}
