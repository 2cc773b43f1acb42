use std::fmt::{Display, Formatter};
use ulid::Ulid;

/// A JavaScript identifier synthesized from a source block or variable id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(String);

impl Identifier {
    pub fn from_source_id(prefix: &str, id: Option<&str>) -> Self {
        match id.filter(|id| !id.is_empty()) {
            Some(id) if is_identifier_safe(id) => Self(format!("{}_{}", prefix, id)),
            Some(id) => Self(format!("{}_{}", prefix, tagged(id))),
            None => Self::unique(prefix),
        }
    }

    pub fn unique(prefix: &str) -> Self {
        let ulid = Ulid::new().to_string().to_ascii_lowercase();
        // The tail of a ULID is drawn from its random component.
        Self(format!("{}_{}", prefix, &ulid[ulid.len() - 10..]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Identifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_identifier_safe(id: &str) -> bool {
    id.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

// Sanitized id plus an md5 prefix of the raw id, so distinct ids stay distinct.
pub(crate) fn tagged(id: &str) -> String {
    format!("{}_{}", sanitize(id), short_digest(id))
}

pub(crate) fn short_digest(id: &str) -> String {
    let digest = format!("{:x}", md5::compute(id.as_bytes()));
    digest[..8].to_string()
}

pub(crate) fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}
