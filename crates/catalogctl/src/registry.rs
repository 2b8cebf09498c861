use std::collections::BTreeMap;
use std::path::Path;

use sources::{BoxError, ImageRegistry};

/// The CLI ships no OCI transport; image references require embedding the
/// library with a real [ImageRegistry]. Filesystem references render fine.
pub struct NullRegistry;

impl NullRegistry {
    fn unsupported(reference: &str) -> BoxError {
        format!(
            "reference {reference:?} looks like an image, but this build supports only \
             declarative config directories and relational files"
        )
        .into()
    }
}

impl ImageRegistry for NullRegistry {
    fn pull(&self, reference: &str) -> Result<(), BoxError> {
        Err(Self::unsupported(reference))
    }

    fn labels(&self, reference: &str) -> Result<BTreeMap<String, String>, BoxError> {
        Err(Self::unsupported(reference))
    }

    fn unpack(&self, reference: &str, _dest: &Path) -> Result<(), BoxError> {
        Err(Self::unsupported(reference))
    }

    fn destroy(&self) -> Result<(), BoxError> {
        Ok(())
    }
}
