use properties::{Payload, Property};

use crate::{Bundle, DeclarativeConfig};

/// Bring a config to its canonical shape:
///
/// - bundle property payloads are canonicalized (key-sorted, compact);
/// - non-object properties precede `olm.bundle.object` / `olm.csv.metadata`
///   properties, with channel-membership properties ordered last among the
///   non-object ones;
/// - related images are sorted by image and collapsed on `(name, image)`.
///
/// Channel entries and deprecation entries also take their canonical order
/// here, so a normalized config compares equal to its model round-trip.
/// Records themselves are left in input order; use [crate::sort_by_package]
/// for bucket ordering.
pub fn normalize(cfg: &mut DeclarativeConfig) {
    for bundle in &mut cfg.bundles {
        normalize_bundle(bundle);
    }
    for channel in &mut cfg.channels {
        channel.entries.sort_by(|a, b| a.name.cmp(&b.name));
    }
    for deprecation in &mut cfg.deprecations {
        deprecation
            .entries
            .sort_by_key(|e| (reference_rank(&e.reference.schema), e.reference.name.clone()));
    }
}

// Deprecation entries order as: package reference, then channels, then
// bundles, then anything else, each by name.
fn reference_rank(schema: &str) -> u8 {
    match schema {
        crate::SCHEMA_PACKAGE => 0,
        crate::SCHEMA_CHANNEL => 1,
        crate::SCHEMA_BUNDLE => 2,
        _ => 3,
    }
}

pub(crate) fn normalize_bundle(bundle: &mut Bundle) {
    let canonicalized = bundle
        .properties
        .drain(..)
        .map(|p| Property::new(p.type_, Payload::from_value(&p.value.to_value())))
        .collect::<Vec<_>>();
    bundle.properties = order_properties(canonicalized);

    bundle
        .related_images
        .sort_by(|a, b| (&a.image, &a.name).cmp(&(&b.image, &b.name)));
    bundle.related_images.dedup();
}

// Stable partition into plain properties, channel-membership properties
// (sorted by payload, which orders them by channel name), and object
// properties.
pub(crate) fn order_properties(props: Vec<Property>) -> Vec<Property> {
    let mut plain = Vec::new();
    let mut channels = Vec::new();
    let mut objects = Vec::new();
    for prop in props {
        if prop.is_object_type() {
            objects.push(prop);
        } else if prop.type_ == properties::TYPE_CHANNEL {
            channels.push(prop);
        } else {
            plain.push(prop);
        }
    }
    channels.sort_by_key(|p| p.value.canonical());

    plain.extend(channels);
    plain.extend(objects);
    plain
}
