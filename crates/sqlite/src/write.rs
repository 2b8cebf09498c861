use std::collections::BTreeMap;

use rusqlite::{params, Connection};

use crate::{migrations, Error};

/// Project a model into a relational catalog. The whole write happens in a
/// single transaction with deferred foreign-key checks; any error rolls the
/// database back to its prior state.
pub fn write(conn: &mut Connection, m: &model::Model) -> Result<(), Error> {
    m.validate()?;
    migrations::migrate(conn)?;

    let tx = conn.transaction()?;
    tx.execute_batch("PRAGMA defer_foreign_keys = ON;")?;
    write_model(&tx, m)?;
    tx.commit()?;
    Ok(())
}

fn write_model(tx: &Connection, m: &model::Model) -> Result<(), Error> {
    // One operatorbundle row per name across all channels; the first node
    // seen (channels iterate in name order) supplies the row, later nodes
    // must agree on every channel-agnostic field.
    let mut pending: BTreeMap<&str, &model::Bundle> = BTreeMap::new();

    for pkg in m.values() {
        tx.execute(
            "INSERT INTO package (name, default_channel) VALUES (?1, ?2);",
            params![pkg.name, pkg.default_channel],
        )?;

        for channel in pkg.channels.values() {
            let head = channel.head().map_err(|source| Error::Head {
                package: pkg.name.clone(),
                channel: channel.name.clone(),
                source,
            })?;
            tx.execute(
                "INSERT INTO channel (name, package_name, head_operatorbundle_name)
                 VALUES (?1, ?2, ?3);",
                params![channel.name, pkg.name, head.name],
            )?;

            write_entries(tx, channel, head)?;

            for bundle in channel.bundles.values() {
                match pending.get(bundle.name.as_str()) {
                    Some(first) => check_equivalent(first, bundle)?,
                    None => {
                        pending.insert(&bundle.name, bundle);
                    }
                }
            }
        }
    }

    for bundle in pending.values() {
        write_bundle(tx, bundle)?;
    }
    Ok(())
}

// Walk from the head along replaces, one row per hop with increasing depth.
// Each skip at depth n emits an auxiliary pair: a dummy row for the skipped
// name at depth n+1, anchored by a second row for the skipping bundle.
fn write_entries(
    tx: &Connection,
    channel: &model::Channel,
    head: &model::Bundle,
) -> Result<(), Error> {
    let mut depth: i64 = 0;
    let mut previous: Option<i64> = None;
    let mut cursor = Some(head);

    while let Some(bundle) = cursor {
        let id = insert_entry(tx, channel, &bundle.name, None, depth)?;
        if let Some(previous) = previous {
            link_replaces(tx, previous, id)?;
        }

        for skip in &bundle.skips {
            let skipped = insert_entry(tx, channel, skip, None, depth + 1)?;
            insert_entry(tx, channel, &bundle.name, Some(skipped), depth)?;
        }

        previous = Some(id);
        depth += 1;
        cursor = match bundle.replaces.as_str() {
            "" => None,
            replaces => match channel.bundles.get(replaces) {
                Some(next) => Some(next),
                None => {
                    // The tail may replace an entry absent from the channel;
                    // synthesize a terminal row for it.
                    let tail = insert_entry(tx, channel, replaces, None, depth)?;
                    link_replaces(tx, id, tail)?;
                    None
                }
            },
        };
    }
    Ok(())
}

fn insert_entry(
    tx: &Connection,
    channel: &model::Channel,
    bundle: &str,
    replaces: Option<i64>,
    depth: i64,
) -> Result<i64, Error> {
    tx.execute(
        "INSERT INTO channel_entry (channel_name, package_name, operatorbundle_name, replaces, depth)
         VALUES (?1, ?2, ?3, ?4, ?5);",
        params![channel.name, channel.package, bundle, replaces, depth],
    )?;
    Ok(tx.last_insert_rowid())
}

fn link_replaces(tx: &Connection, from: i64, to: i64) -> Result<(), Error> {
    tx.execute(
        "UPDATE channel_entry SET replaces = ?1 WHERE entry_id = ?2;",
        params![to, from],
    )?;
    Ok(())
}

// Channel-agnostic fields must agree between the nodes of one bundle;
// replaces, skips, and the channel properties they project into are the
// only per-channel state.
fn check_equivalent(first: &model::Bundle, other: &model::Bundle) -> Result<(), Error> {
    let unrepresentable = |field| Error::Unrepresentable {
        bundle: other.name.clone(),
        field,
    };
    if first.image != other.image {
        return Err(unrepresentable("image"));
    }
    if first.version != other.version {
        return Err(unrepresentable("version"));
    }
    if first.skip_range != other.skip_range {
        return Err(unrepresentable("skipRange"));
    }
    if first.csv_json != other.csv_json || first.objects != other.objects {
        return Err(unrepresentable("objects"));
    }
    if persistent_properties(first) != persistent_properties(other) {
        return Err(unrepresentable("properties"));
    }

    let mut a = first.related_images.clone();
    let mut b = other.related_images.clone();
    a.sort();
    b.sort();
    if a != b {
        return Err(unrepresentable("relatedImages"));
    }
    Ok(())
}

// The canonical multiset of properties, excluding channel membership.
fn persistent_properties(bundle: &model::Bundle) -> Vec<(String, String)> {
    let mut props: Vec<(String, String)> = bundle
        .properties
        .iter()
        .filter(|p| p.type_ != properties::TYPE_CHANNEL)
        .map(|p| p.canonical())
        .collect();
    props.sort();
    props
}

fn write_bundle(tx: &Connection, bundle: &model::Bundle) -> Result<(), Error> {
    let parsed = bundle.parsed_properties()?;

    let objects = if bundle.objects.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&bundle.objects).expect("object lists always serialize"))
    };
    let csv = (!bundle.csv_json.is_empty()).then(|| bundle.csv_json.as_str());

    tx.execute(
        "INSERT INTO operatorbundle
            (name, csv, bundle, bundlepath, skiprange, version, replaces, skips, substitutesfor)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL);",
        params![
            bundle.name,
            csv,
            objects,
            bundle.image,
            bundle.skip_range,
            bundle.version.to_string(),
            bundle.replaces,
            bundle.skips.join(","),
        ],
    )?;

    for prop in &bundle.properties {
        // Channel membership lives in channel_entry; objects in the bundle
        // column. Neither is duplicated into the properties table.
        if prop.type_ == properties::TYPE_CHANNEL
            || prop.type_ == properties::TYPE_BUNDLE_OBJECT
        {
            continue;
        }
        tx.execute(
            "INSERT INTO properties
                (type, value, operatorbundle_name, operatorbundle_version, operatorbundle_path)
             VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                prop.type_,
                prop.value.as_str(),
                bundle.name,
                bundle.version.to_string(),
                bundle.image,
            ],
        )?;
    }

    for image in &bundle.related_images {
        tx.execute(
            "INSERT INTO related_image (image, operatorbundle_name) VALUES (?1, ?2);",
            params![image.image, bundle.name],
        )?;
    }

    for (gvk, table) in parsed
        .gvks
        .iter()
        .map(|g| ((&g.group, &g.version, &g.kind), "api_provider"))
        .chain(
            parsed
                .gvks_required
                .iter()
                .map(|g| ((&g.group, &g.version, &g.kind), "api_requirer")),
        )
    {
        let (group, version, kind) = gvk;
        tx.execute(
            "INSERT OR IGNORE INTO api (group_name, version, kind, plural) VALUES (?1, ?2, ?3, '');",
            params![group, version, kind],
        )?;
        tx.execute(
            &format!(
                "INSERT INTO {table}
                    (group_name, version, kind, operatorbundle_name, operatorbundle_version, operatorbundle_path)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6);"
            ),
            params![
                group,
                version,
                kind,
                bundle.name,
                bundle.version.to_string(),
                bundle.image,
            ],
        )?;
    }

    if bundle.deprecation.is_some() {
        tx.execute(
            "INSERT OR IGNORE INTO deprecated (operatorbundle_name) VALUES (?1);",
            params![bundle.name],
        )?;
    }
    Ok(())
}
