//! Subscription and topic identifiers
//!
//! Identifiers are accepted either as a short resource name (`orders-sub`) or
//! as a fully-qualified path (`projects/acme/subscriptions/orders-sub`).
//! Both forms are validated against the broker's resource naming rules.

use std::fmt;

use crate::error::{Error, Result};

const MIN_NAME_LEN: usize = 3;
pub(crate) const MAX_NAME_LEN: usize = 255;

/// Validate a single resource name segment
fn validate_name(input: &str, name: &str) -> Result<()> {
    if name.len() < MIN_NAME_LEN || name.len() > MAX_NAME_LEN {
        return Err(Error::validation(
            input,
            format!("name must be {MIN_NAME_LEN}-{MAX_NAME_LEN} characters"),
        ));
    }
    if !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return Err(Error::validation(input, "name must start with a letter"));
    }
    if name.starts_with("goog") {
        return Err(Error::validation(input, "name must not start with \"goog\""));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || "-_.~+%".contains(*c)))
    {
        return Err(Error::validation(
            input,
            format!("name contains invalid character {bad:?}"),
        ));
    }
    Ok(())
}

/// Validate `input`, returning whether it is qualified and where the name starts
fn parse(input: &str, collection: &str) -> Result<(bool, usize)> {
    if !input.contains('/') {
        validate_name(input, input)?;
        return Ok((false, 0));
    }

    let parts: Vec<&str> = input.split('/').collect();
    match parts.as_slice() {
        ["projects", project, kind, name] if *kind == collection => {
            if project.is_empty() {
                return Err(Error::validation(input, "project must not be empty"));
            }
            validate_name(input, name)?;
            let name_start = input.len() - name.len();
            Ok((true, name_start))
        }
        _ => Err(Error::validation(
            input,
            format!("expected projects/{{project}}/{collection}/{{name}}"),
        )),
    }
}

macro_rules! resource_id {
    ($(#[$meta:meta])* $ty:ident, $collection:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $ty {
            raw: String,
            name_start: usize,
            has_project: bool,
        }

        impl $ty {
            /// Parse and validate an identifier
            pub fn new(input: impl Into<String>) -> Result<Self> {
                let raw = input.into();
                let (has_project, name_start) = parse(&raw, $collection)?;
                Ok(Self {
                    raw,
                    name_start,
                    has_project,
                })
            }

            /// Identifier exactly as given
            pub fn as_str(&self) -> &str {
                &self.raw
            }

            /// Short resource name (last path segment)
            pub fn name(&self) -> &str {
                &self.raw[self.name_start..]
            }

            /// Project segment, if the identifier is fully qualified
            pub fn project(&self) -> Option<&str> {
                if self.has_project {
                    self.raw.split('/').nth(1)
                } else {
                    None
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.raw)
            }
        }

        impl std::str::FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                Self::new(s)
            }
        }
    };
}

resource_id!(
    /// Identity of a subscription
    SubscriptionId,
    "subscriptions"
);

resource_id!(
    /// Identity of a topic
    TopicId,
    "topics"
);

impl SubscriptionId {
    /// Build a subscription identifier named `name` in the same project as `topic`
    pub fn sibling_of(topic: &TopicId, name: &str) -> Result<Self> {
        match topic.project() {
            Some(project) => Self::new(format!("projects/{project}/subscriptions/{name}")),
            None => Self::new(name),
        }
    }
}
