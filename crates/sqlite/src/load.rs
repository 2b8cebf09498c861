use std::collections::BTreeMap;

use properties::{Payload, Property};
use rusqlite::Connection;

use crate::{migrations, Error};

struct BundleRow {
    csv: Option<String>,
    objects: Option<String>,
    path: Option<String>,
    skip_range: Option<String>,
    version: Option<String>,
}

struct EntryRow {
    entry_id: i64,
    bundle: String,
    replaces: Option<i64>,
}

/// Translate a relational catalog into its declarative form. The database
/// schema is migrated in place first, so old databases read transparently.
pub fn load(conn: &Connection) -> Result<declcfg::DeclarativeConfig, Error> {
    migrations::migrate(conn)?;
    let mut cfg = declcfg::DeclarativeConfig::default();

    let bundle_rows = query_bundle_rows(conn)?;
    let entry_rows = query_entry_rows(conn)?;

    // A bundle's package is implied by the channel entries naming it.
    let mut package_of: BTreeMap<String, String> = BTreeMap::new();
    for ((package, _), rows) in &entry_rows {
        for row in rows {
            if let Some(previous) = package_of.get(&row.bundle) {
                if previous != package {
                    tracing::warn!(
                        bundle = %row.bundle,
                        "bundle appears in entries of multiple packages; keeping {previous:?}",
                    );
                }
                continue;
            }
            package_of.insert(row.bundle.clone(), package.clone());
        }
    }

    let mut stmt = conn.prepare("SELECT name, default_channel FROM package ORDER BY name;")?;
    let packages = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
    })?;
    for row in packages {
        let (name, default_channel) = row?;
        cfg.packages.push(declcfg::Package {
            schema: declcfg::SCHEMA_PACKAGE.to_string(),
            name,
            default_channel: default_channel.unwrap_or_default(),
            ..Default::default()
        });
    }

    // Channel membership properties, rebuilt from the reconstructed entries.
    let mut memberships: BTreeMap<String, Vec<properties::Channel>> = BTreeMap::new();

    let mut stmt =
        conn.prepare("SELECT name, package_name FROM channel ORDER BY package_name, name;")?;
    let channels = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in channels {
        let (name, package) = row?;
        let rows = entry_rows
            .get(&(package.clone(), name.clone()))
            .map(Vec::as_slice)
            .unwrap_or_default();
        let entries = reconstruct_entries(&name, rows, &bundle_rows, &mut memberships);
        cfg.channels.push(declcfg::Channel {
            schema: declcfg::SCHEMA_CHANNEL.to_string(),
            name,
            package,
            entries,
        });
    }

    for (name, row) in &bundle_rows {
        let package = match package_of.get(name) {
            Some(package) => package.clone(),
            None => {
                tracing::warn!(bundle = %name, "bundle appears in no channel entry; dropping");
                continue;
            }
        };
        let bundle = load_bundle(conn, name, &package, row, &memberships)?;
        cfg.bundles.push(bundle);
    }

    load_deprecations(conn, &package_of, &mut cfg)?;

    declcfg::sort_by_package(&mut cfg);
    Ok(cfg)
}

fn query_bundle_rows(conn: &Connection) -> Result<BTreeMap<String, BundleRow>, Error> {
    let mut stmt = conn.prepare(
        "SELECT name, csv, bundle, bundlepath, skiprange, version FROM operatorbundle ORDER BY name;",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            BundleRow {
                csv: row.get(1)?,
                objects: row.get(2)?,
                path: row.get(3)?,
                skip_range: row.get(4)?,
                version: row.get(5)?,
            },
        ))
    })?;
    let mut out = BTreeMap::new();
    for row in rows {
        let (name, bundle) = row?;
        out.insert(name, bundle);
    }
    Ok(out)
}

type EntryKey = (String, String); // (package, channel)

fn query_entry_rows(conn: &Connection) -> Result<BTreeMap<EntryKey, Vec<EntryRow>>, Error> {
    let mut stmt = conn.prepare(
        "SELECT package_name, channel_name, entry_id, operatorbundle_name, replaces
           FROM channel_entry ORDER BY depth, entry_id;",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            (row.get::<_, String>(0)?, row.get::<_, String>(1)?),
            EntryRow {
                entry_id: row.get(2)?,
                bundle: row.get(3)?,
                replaces: row.get(4)?,
            },
        ))
    })?;
    let mut out: BTreeMap<EntryKey, Vec<EntryRow>> = BTreeMap::new();
    for row in rows {
        let (key, entry) = row?;
        out.entry(key).or_default().push(entry);
    }
    Ok(out)
}

// The minimum-depth row of each bundle name is its canonical entry; its
// replaces join names the replaced entry. Additional rows for the same name
// anchor skip edges: each contributes its replaces-target as a skip.
fn reconstruct_entries(
    channel: &str,
    rows: &[EntryRow],
    bundle_rows: &BTreeMap<String, BundleRow>,
    memberships: &mut BTreeMap<String, Vec<properties::Channel>>,
) -> Vec<declcfg::ChannelEntry> {
    let id_to_name: BTreeMap<i64, &str> = rows
        .iter()
        .map(|r| (r.entry_id, r.bundle.as_str()))
        .collect();

    let mut entries: BTreeMap<String, declcfg::ChannelEntry> = BTreeMap::new();
    for row in rows {
        let target = row
            .replaces
            .and_then(|id| id_to_name.get(&id))
            .map(|name| name.to_string());
        match entries.get_mut(&row.bundle) {
            None => {
                entries.insert(
                    row.bundle.clone(),
                    declcfg::ChannelEntry {
                        name: row.bundle.clone(),
                        replaces: target.unwrap_or_default(),
                        skips: Vec::new(),
                        skip_range: bundle_rows
                            .get(&row.bundle)
                            .and_then(|b| b.skip_range.clone())
                            .unwrap_or_default(),
                    },
                );
            }
            Some(entry) => {
                if let Some(target) = target {
                    if !entry.skips.contains(&target) {
                        entry.skips.push(target);
                    }
                }
            }
        }
    }

    entries
        .into_values()
        .filter(|entry| {
            // Rows for names with no bundle exist only to anchor edges.
            let known = bundle_rows.contains_key(&entry.name);
            if !known {
                tracing::debug!(channel, entry = %entry.name, "dropping entry with no bundle");
            }
            known
        })
        .map(|entry| {
            memberships
                .entry(entry.name.clone())
                .or_default()
                .push(properties::Channel {
                    name: channel.to_string(),
                    replaces: entry.replaces.clone(),
                });
            entry
        })
        .collect()
}

fn load_bundle(
    conn: &Connection,
    name: &str,
    package: &str,
    row: &BundleRow,
    memberships: &BTreeMap<String, Vec<properties::Channel>>,
) -> Result<declcfg::Bundle, Error> {
    let mut props: Vec<Property> = Vec::new();

    let mut stmt = conn.prepare(
        "SELECT type, value FROM properties WHERE operatorbundle_name = ?1 ORDER BY rowid;",
    )?;
    let rows = stmt.query_map([name], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    for prop in rows {
        let (type_, value) = prop?;
        // Channel membership and object properties are rebuilt from the
        // entries and the bundle column; stored copies are stale.
        if type_ == properties::TYPE_CHANNEL || type_ == properties::TYPE_BUNDLE_OBJECT {
            continue;
        }
        let value = Payload::from_json(value).map_err(|source| Error::Decode {
            bundle: name.to_string(),
            column: "properties.value",
            source,
        })?;
        props.push(Property::new(type_, value));
    }

    if !props.iter().any(|p| p.type_ == properties::TYPE_PACKAGE) {
        if let Some(version) = row.version.as_deref().filter(|v| !v.is_empty()) {
            props.push(properties::build(&properties::Package {
                package_name: package.to_string(),
                version: version.to_string(),
            }));
        }
    }

    for (table, required) in [("api_provider", false), ("api_requirer", true)] {
        let mut stmt = conn.prepare(&format!(
            "SELECT group_name, version, kind FROM {table} WHERE operatorbundle_name = ?1
              ORDER BY group_name, version, kind;"
        ))?;
        let rows = stmt.query_map([name], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        for gvk in rows {
            let (group, version, kind) = gvk?;
            let prop = if required {
                properties::build(&properties::GVKRequired { group, kind, version })
            } else {
                properties::build(&properties::GVK { group, kind, version })
            };
            if !props.contains(&prop) {
                props.push(prop);
            }
        }
    }

    for membership in memberships.get(name).into_iter().flatten() {
        props.push(properties::build(membership));
    }

    let mut objects = Vec::new();
    let mut csv_json = String::new();
    if let Some(blob) = row.objects.as_deref().filter(|b| !b.is_empty()) {
        objects = serde_json::from_str::<Vec<String>>(blob).map_err(|source| Error::Decode {
            bundle: name.to_string(),
            column: "operatorbundle.bundle",
            source,
        })?;
        for object in &objects {
            props.push(properties::build(&properties::BundleObject::from_bytes(
                object.as_bytes(),
            )));
        }
    }
    if let Some(csv) = row.csv.as_deref().filter(|c| !c.is_empty()) {
        csv_json = csv.to_string();
    }

    let mut related_images = Vec::new();
    let mut stmt = conn.prepare(
        "SELECT image FROM related_image WHERE operatorbundle_name = ?1 ORDER BY image;",
    )?;
    let rows = stmt.query_map([name], |row| row.get::<_, Option<String>>(0))?;
    for image in rows {
        match image? {
            Some(image) if !image.is_empty() => related_images.push(declcfg::RelatedImage {
                name: String::new(),
                image,
            }),
            _ => {
                tracing::warn!(bundle = %name, "dropping related image with NULL image reference")
            }
        }
    }

    Ok(declcfg::Bundle {
        schema: declcfg::SCHEMA_BUNDLE.to_string(),
        name: name.to_string(),
        package: package.to_string(),
        image: row.path.clone().unwrap_or_default(),
        properties: props,
        related_images,
        objects,
        csv_json,
    })
}

fn load_deprecations(
    conn: &Connection,
    package_of: &BTreeMap<String, String>,
    cfg: &mut declcfg::DeclarativeConfig,
) -> Result<(), Error> {
    let mut stmt = conn.prepare("SELECT operatorbundle_name FROM deprecated ORDER BY 1;")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

    let mut by_package: BTreeMap<String, Vec<declcfg::DeprecationEntry>> = BTreeMap::new();
    for bundle in rows {
        let bundle = bundle?;
        let package = match package_of.get(&bundle) {
            Some(package) => package.clone(),
            None => {
                tracing::warn!(bundle = %bundle, "deprecated bundle appears in no channel; dropping");
                continue;
            }
        };
        by_package
            .entry(package)
            .or_default()
            .push(declcfg::DeprecationEntry {
                reference: declcfg::PackageScopedReference {
                    schema: declcfg::SCHEMA_BUNDLE.to_string(),
                    name: bundle,
                },
                message: String::new(),
            });
    }
    for (package, entries) in by_package {
        cfg.deprecations.push(declcfg::Deprecation {
            schema: declcfg::SCHEMA_DEPRECATIONS.to_string(),
            package,
            entries,
        });
    }
    Ok(())
}
