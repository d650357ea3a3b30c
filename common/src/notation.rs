use std::sync::LazyLock;

static NOTATION: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(
        r"^(?P<group>[^:@/\\\s]+):(?P<name>[^:@/\\\s]+)(?::(?P<version>[^:@/\\\s]+))?(?::(?P<classifier>[^:@/\\\s]+))?(?:@(?P<extension>[^:@/\\\s]+))?$",
    )
    .expect("valid dependency notation regex")
});

pub const DEFAULT_EXTENSION: &str = "jar";

/// Dependency coordinates in the form `group:name[:version[:classifier]][@extension]`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DependencyNotation {
    pub group: String,
    pub name: String,
    pub version: Option<String>,
    pub classifier: Option<String>,
    pub extension: String,
}

impl DependencyNotation {
    pub fn parse(value: &str) -> Option<Self> {
        let captures = NOTATION.captures(value.trim())?;
        let part = |name: &str| captures.name(name).map(|m| m.as_str().to_string());
        Some(Self {
            group: part("group")?,
            name: part("name")?,
            version: part("version"),
            classifier: part("classifier"),
            extension: part("extension").unwrap_or_else(|| DEFAULT_EXTENSION.to_string()),
        })
    }

    /// True for notations carrying at least `group:name:version`
    pub fn is_versioned(value: &str) -> bool {
        Self::parse(value).is_some_and(|notation| notation.version.is_some())
    }

    /// Artifact file name as laid out in a repository: `name-version[-classifier].extension`
    pub fn file_name(&self) -> String {
        let mut file_name = self.name.clone();
        if let Some(version) = &self.version {
            file_name.push('-');
            file_name.push_str(version);
        }
        if let Some(classifier) = &self.classifier {
            file_name.push('-');
            file_name.push_str(classifier);
        }
        file_name.push('.');
        file_name.push_str(&self.extension);
        file_name
    }

    /// Flat, collision-free file name: `group_name_version[_classifier].extension`
    pub fn flat_name(&self) -> String {
        let mut parts = vec![self.group.as_str(), self.name.as_str()];
        parts.extend(self.version.as_deref());
        parts.extend(self.classifier.as_deref());
        format!("{}.{}", parts.join("_"), self.extension)
    }
}

impl std::fmt::Display for DependencyNotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.group, self.name)?;
        if let Some(version) = &self.version {
            write!(f, ":{version}")?;
        }
        if let Some(classifier) = &self.classifier {
            write!(f, ":{classifier}")?;
        }
        write!(f, "@{}", self.extension)
    }
}

impl std::str::FromStr for DependencyNotation {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value).ok_or_else(|| {
            anyhow::anyhow!(
                "'{value}' is not a dependency notation, expected group:name[:version[:classifier]][@extension]"
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_notation() {
        let notation = DependencyNotation::parse("com.example:tool:1.2.3:dist@zip").unwrap();
        assert_eq!(notation.group, "com.example");
        assert_eq!(notation.name, "tool");
        assert_eq!(notation.version.as_deref(), Some("1.2.3"));
        assert_eq!(notation.classifier.as_deref(), Some("dist"));
        assert_eq!(notation.extension, "zip");
        assert_eq!(notation.file_name(), "tool-1.2.3-dist.zip");
        assert_eq!(notation.flat_name(), "com.example_tool_1.2.3_dist.zip");
        assert_eq!(notation.to_string(), "com.example:tool:1.2.3:dist@zip");
    }

    #[test]
    fn extension_defaults_to_jar() {
        let notation: DependencyNotation = "org.acme:lib:2.0".parse().unwrap();
        assert_eq!(notation.extension, "jar");
        assert_eq!(notation.file_name(), "lib-2.0.jar");
    }

    #[test]
    fn version_is_optional_but_tracked() {
        assert!(DependencyNotation::parse("org.acme:lib").is_some());
        assert!(!DependencyNotation::is_versioned("org.acme:lib"));
        assert!(DependencyNotation::is_versioned("org.acme:lib:1.0@zip"));
    }

    #[test]
    fn urls_and_paths_are_not_notations() {
        assert!(DependencyNotation::parse("https://host/a/b.jar").is_none());
        assert!(DependencyNotation::parse("C:\\dir\\b.jar").is_none());
        assert!(DependencyNotation::parse("/opt/lib/b.jar").is_none());
        assert!(DependencyNotation::parse("b.jar").is_none());
    }
}
