use std::fmt;

/// A single invariant violation found while validating a model.
#[derive(thiserror::Error, Debug)]
pub enum ValidateError {
    #[error("package has an empty name")]
    EmptyPackageName,
    #[error("package {package:?} must contain at least one channel")]
    NoChannels { package: String },
    #[error("package {package:?} has an empty default channel")]
    DefaultChannelEmpty { package: String },
    #[error("package {package:?}: default channel {channel:?} not found")]
    DefaultChannelNotFound { package: String, channel: String },
    #[error("package {package:?}: icon must carry both data and a media type")]
    InvalidIcon { package: String },
    #[error("package {package:?}: channel {channel:?} names owning package {actual:?}")]
    ChannelPackageMismatch {
        package: String,
        channel: String,
        actual: String,
    },
    #[error("package {package:?} contains a channel with an empty name")]
    EmptyChannelName { package: String },
    #[error("channel {package:?}/{channel:?} must contain at least one bundle")]
    EmptyChannel { package: String, channel: String },
    #[error("channel {package:?}/{channel:?} has no head: every entry is replaced or skipped")]
    NoHead { package: String, channel: String },
    #[error("channel {package:?}/{channel:?} has multiple heads: {}", .heads.join(", "))]
    MultipleHeads {
        package: String,
        channel: String,
        heads: Vec<String>,
    },
    #[error("channel {package:?}/{channel:?} replaces chain contains a cycle: {}", .chain.join(" -> "))]
    ReplacesCycle {
        package: String,
        channel: String,
        chain: Vec<String>,
    },
    #[error("channel {package:?}/{channel:?}: bundle {bundle:?} is neither on the replaces chain from the head nor skipped by any entry")]
    StrandedBundle {
        package: String,
        channel: String,
        bundle: String,
    },
    #[error("bundle {bundle:?} names package {actual:?}, expected {package:?}")]
    BundlePackageMismatch {
        package: String,
        bundle: String,
        actual: String,
    },
    #[error("bundle {bundle:?} names channel {actual:?}, expected {channel:?}")]
    BundleChannelMismatch {
        channel: String,
        bundle: String,
        actual: String,
    },
    #[error("channel {package:?}/{channel:?} contains a bundle with an empty name")]
    EmptyBundleName { package: String, channel: String },
    #[error("bundle {package:?}/{bundle:?}: {source}")]
    InvalidProperty {
        package: String,
        bundle: String,
        #[source]
        source: properties::Error,
    },
    #[error("bundle {package:?}/{bundle:?} must have exactly one {type_:?} property, found {count}", type_ = properties::TYPE_PACKAGE)]
    PackagePropertyCount {
        package: String,
        bundle: String,
        count: usize,
    },
    #[error("bundle {package:?}/{bundle:?}: package property names {actual:?}")]
    PackagePropertyForeign {
        package: String,
        bundle: String,
        actual: String,
    },
    #[error("bundle {package:?}/{bundle:?}: version {version:?} is not valid SemVer: {source}")]
    InvalidVersion {
        package: String,
        bundle: String,
        version: String,
        #[source]
        source: semver::Error,
    },
    #[error("bundle {package:?}/{bundle:?}: package property version {property:?} disagrees with bundle version {version:?}")]
    VersionMismatch {
        package: String,
        bundle: String,
        property: String,
        version: String,
    },
    #[error("bundle {package:?}/{bundle:?} must have at least one {type_:?} property", type_ = properties::TYPE_CHANNEL)]
    NoChannelProperty { package: String, bundle: String },
    #[error("bundle {package:?}/{bundle:?}: no channel property matches membership in channel {channel:?} (replaces {replaces:?})")]
    ChannelPropertyMismatch {
        package: String,
        bundle: String,
        channel: String,
        replaces: String,
    },
    #[error("bundle {package:?}/{bundle:?} skips itself")]
    SkipsSelfReference { package: String, bundle: String },
    #[error("bundle {package:?}/{bundle:?} has an empty skips value")]
    EmptySkipValue { package: String, bundle: String },
    #[error("bundle {package:?}/{bundle:?} has a related image with an empty image reference")]
    EmptyRelatedImage { package: String, bundle: String },
}

/// Every invariant violation of a model, surfaced at once.
#[derive(Debug)]
pub struct ValidateErrors(pub Vec<ValidateError>);

impl fmt::Display for ValidateErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid catalog:")?;
        for err in &self.0 {
            write!(f, "\n  - {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidateErrors {}

impl From<ValidateError> for ValidateErrors {
    fn from(err: ValidateError) -> Self {
        Self(vec![err])
    }
}
