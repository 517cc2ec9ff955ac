//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use empipe_core::{
    Direction, EmpipeError, Item, ItemFilter, ItemOrder, ObjectSet, RelationGraph, RelationKind,
    SetLocation, SortDirection, Value,
};
use std::path::Path;

/// Convert a stored value into a printable JSON value.
fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Empty => serde_json::Value::Null,
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Float(f) => serde_json::Value::from(*f),
        Value::Str(s) => serde_json::Value::from(s.as_str()),
        Value::Bool(b) => serde_json::Value::from(*b),
        Value::Record(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), value_to_json(v)))
                .collect(),
        ),
    }
}

fn item_to_json(item: &Item) -> serde_json::Value {
    let mut obj = serde_json::Map::new();
    obj.insert(
        "id".to_string(),
        item.id().map_or(serde_json::Value::Null, |id| {
            serde_json::Value::from(id.value())
        }),
    );
    obj.insert("enabled".to_string(), serde_json::Value::from(item.is_enabled()));
    for (name, value) in item.attributes() {
        obj.insert(name.to_string(), value_to_json(value));
    }
    serde_json::Value::Object(obj)
}

/// Parse an `attribute=value` filter argument. Integers filter through
/// the index when one exists; anything else compares as a string.
fn parse_attr_filter(spec: &str) -> Result<ItemFilter, EmpipeError> {
    let (name, raw) = spec.split_once('=').ok_or_else(|| {
        EmpipeError::Construction(format!("expected attribute=value, got '{spec}'"))
    })?;
    let value = match raw.parse::<i64>() {
        Ok(i) => Value::Int(i),
        Err(_) => Value::Str(raw.to_string()),
    };
    Ok(ItemFilter::AttrEq(name.to_string(), value))
}

// =============================================================================
// INFO COMMAND
// =============================================================================

/// Show a set's kind, size, metadata, and indexes.
pub fn cmd_info(set_path: &Path, json_mode: bool) -> Result<(), EmpipeError> {
    let mut set = ObjectSet::open(SetLocation::file(set_path))?;
    let size = set.size()?;
    let info = set.info()?;
    let indexes = set.indexes()?;

    if json_mode {
        let output = serde_json::json!({
            "location": set_path.display().to_string(),
            "kind": set.kind().name(),
            "size": size,
            "indexes": indexes,
            "info": info.iter()
                .map(|(k, v)| (k.clone(), value_to_json(v)))
                .collect::<serde_json::Map<_, _>>(),
        });
        println!("{}", serde_json::to_string_pretty(&output).map_err(to_serialization)?);
        return Ok(());
    }

    println!("Set:      {}", set_path.display());
    println!("Kind:     {}", set.kind());
    println!("Size:     {size}");
    println!("Indexes:  {}", if indexes.is_empty() { "-".to_string() } else { indexes.join(", ") });
    if !info.is_empty() {
        println!("Metadata:");
        for (name, value) in &info {
            println!("  {name} = {}", value_to_json(value));
        }
    }
    Ok(())
}

// =============================================================================
// ITEMS COMMAND
// =============================================================================

/// Stream items from a set with filtering and ordering.
#[allow(clippy::fn_params_excessive_bools)]
pub fn cmd_items(
    set_path: &Path,
    attr: Option<&str>,
    order_by: Option<&str>,
    desc: bool,
    enabled: bool,
    limit: usize,
    json_mode: bool,
) -> Result<(), EmpipeError> {
    let mut set = ObjectSet::open(SetLocation::file(set_path))?;

    let filter = match (attr, enabled) {
        (Some(spec), _) => parse_attr_filter(spec)?,
        (None, true) => ItemFilter::Enabled,
        (None, false) => ItemFilter::All,
    };
    let order = match order_by {
        Some(attribute) => ItemOrder::Attr(attribute.to_string()),
        None => ItemOrder::Id,
    };
    let direction = if desc {
        SortDirection::Desc
    } else {
        SortDirection::Asc
    };

    tracing::debug!(?filter, ?order, "streaming items");

    let cursor = set.select(filter, order, direction)?;
    let mut printed = 0usize;
    for item in cursor.take(limit) {
        let item = item?;
        if json_mode {
            println!("{}", serde_json::to_string(&item_to_json(&item)).map_err(to_serialization)?);
        } else {
            let id = item.id().map_or_else(|| "-".to_string(), |i| i.to_string());
            let attrs: Vec<String> = item
                .attributes()
                .map(|(name, value)| format!("{name}={}", value_to_json(value)))
                .collect();
            println!("[{id}] enabled={} {}", item.is_enabled(), attrs.join(" "));
        }
        printed += 1;
    }
    if !json_mode {
        println!("({printed} items)");
    }
    Ok(())
}

// =============================================================================
// FILES COMMAND
// =============================================================================

/// Enumerate every file a set references.
pub fn cmd_files(set_path: &Path, json_mode: bool) -> Result<(), EmpipeError> {
    let mut set = ObjectSet::open(SetLocation::file(set_path))?;
    let files = set.files()?;

    if json_mode {
        let names: Vec<String> = files.iter().map(|p| p.display().to_string()).collect();
        println!("{}", serde_json::to_string_pretty(&names).map_err(to_serialization)?);
        return Ok(());
    }
    for file in &files {
        println!("{}", file.display());
    }
    Ok(())
}

// =============================================================================
// INDEX COMMAND
// =============================================================================

/// Create, drop, or list secondary indexes.
pub fn cmd_index(
    set_path: &Path,
    create: Option<&str>,
    drop: Option<&str>,
    json_mode: bool,
) -> Result<(), EmpipeError> {
    let mut set = ObjectSet::open(SetLocation::file(set_path))?;

    if let Some(attribute) = create {
        set.create_index(attribute)?;
        tracing::info!(attribute, "index created");
    }
    if let Some(attribute) = drop {
        let existed = set.drop_index(attribute)?;
        if existed {
            tracing::info!(attribute, "index dropped");
        } else {
            tracing::warn!(attribute, "index did not exist");
        }
    }

    let indexes = set.indexes()?;
    if json_mode {
        println!("{}", serde_json::to_string_pretty(&indexes).map_err(to_serialization)?);
    } else if indexes.is_empty() {
        println!("(no indexes)");
    } else {
        for attribute in &indexes {
            println!("{attribute}");
        }
    }
    Ok(())
}

// =============================================================================
// RELATED COMMAND
// =============================================================================

/// Walk the provenance graph of a working directory.
pub fn cmd_related(
    work_dir: &Path,
    set_path: &Path,
    direction: &str,
    kind: &str,
    json_mode: bool,
) -> Result<(), EmpipeError> {
    let direction = match direction {
        "parents" => Direction::Parents,
        "children" => Direction::Children,
        other => {
            return Err(EmpipeError::Construction(format!(
                "unknown direction '{other}', expected parents or children"
            )))
        }
    };
    let kind = RelationKind::parse(kind).ok_or_else(|| {
        EmpipeError::Construction(format!(
            "unknown relation kind '{kind}', expected source, transform, or ctf"
        ))
    })?;

    let graph = RelationGraph::open(work_dir.join("relations.redb"))?;
    let related = graph.related(&SetLocation::file(set_path), kind, direction)?;

    if json_mode {
        let keys: Vec<String> = related.iter().map(SetLocation::as_key).collect();
        println!("{}", serde_json::to_string_pretty(&keys).map_err(to_serialization)?);
        return Ok(());
    }
    if related.is_empty() {
        println!("(no related sets)");
    }
    for location in &related {
        println!("{location}");
    }
    Ok(())
}

fn to_serialization(e: serde_json::Error) -> EmpipeError {
    EmpipeError::Serialization(e.to_string())
}

// =============================================================================
// TESTS
// =============================================================================
