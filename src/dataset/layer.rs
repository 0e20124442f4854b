use anyhow::{bail, Context, Result};
use geo::{Centroid, Coord, Point};
use geozero::wkb::GpkgWkb;
use geozero::{CoordDimensions, ToGeo, ToWkb};
use serde_json::{json, Value as JsonValue};
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Row, Sqlite, TypeInfo, ValueRef};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::OutputConfig;
use crate::crs::Crs;
use crate::models::{Address, AddressResult, Gate, PointLayer, Properties};

/// "GPKG" in the SQLite header
const GPKG_APPLICATION_ID: i64 = 0x4750_4B47;
const GPKG_USER_VERSION: i64 = 10400;

const FID_COLUMN: &str = "fid";
const GEOMETRY_COLUMN: &str = "geom";

/// srs_id of the "undefined cartesian" system every GeoPackage carries
const UNDEFINED_SRS: i64 = -1;

const WGS84_WKT: &str = r#"GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],PRIMEM["Greenwich",0,AUTHORITY["EPSG","8901"]],UNIT["degree",0.0174532925199433,AUTHORITY["EPSG","9122"]],AUTHORITY["EPSG","4326"]]"#;

const GPKG_SCHEMA: [&str; 3] = [
    "CREATE TABLE gpkg_spatial_ref_sys (
        srs_name TEXT NOT NULL,
        srs_id INTEGER NOT NULL PRIMARY KEY,
        organization TEXT NOT NULL,
        organization_coordsys_id INTEGER NOT NULL,
        definition TEXT NOT NULL,
        description TEXT
    )",
    "CREATE TABLE gpkg_contents (
        table_name TEXT NOT NULL PRIMARY KEY,
        data_type TEXT NOT NULL,
        identifier TEXT UNIQUE,
        description TEXT DEFAULT '',
        last_change DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
        min_x DOUBLE,
        min_y DOUBLE,
        max_x DOUBLE,
        max_y DOUBLE,
        srs_id INTEGER,
        CONSTRAINT fk_gc_r_srs_id FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys(srs_id)
    )",
    "CREATE TABLE gpkg_geometry_columns (
        table_name TEXT NOT NULL,
        column_name TEXT NOT NULL,
        geometry_type_name TEXT NOT NULL,
        srs_id INTEGER NOT NULL,
        z TINYINT NOT NULL,
        m TINYINT NOT NULL,
        CONSTRAINT pk_geom_cols PRIMARY KEY (table_name, column_name),
        CONSTRAINT fk_gc_tn FOREIGN KEY (table_name) REFERENCES gpkg_contents(table_name),
        CONSTRAINT fk_gc_srs FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys (srs_id)
    )",
];

/// A layer as read from a GeoPackage, before it is typed into addresses or gates
#[derive(Debug, Clone)]
pub struct RawLayer {
    pub name: String,
    pub crs: Option<Crs>,
    pub features: Vec<RawFeature>,
}

#[derive(Debug, Clone)]
pub struct RawFeature {
    pub position: Option<Coord<f64>>,
    pub properties: Properties,
}

#[derive(Debug)]
struct ColumnInfo {
    name: String,
    declared: String,
    primary_key: bool,
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

async fn open(path: &Path, create: bool) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(create)
        .read_only(!create);

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open GeoPackage {}", path.display()))
}

/// Read one feature layer of a GeoPackage
pub async fn read_layer(path: &Path, layer: &str) -> Result<RawLayer> {
    info!("Reading layer '{}' from {}", layer, path.display());

    let pool = open(path, false)
        .await
        .with_context(|| format!("Failed to read dataset layer '{}'", layer))?;
    let raw = read_features(&pool, layer)
        .await
        .with_context(|| format!("Failed to read layer '{}' of {}", layer, path.display()));
    pool.close().await;
    let raw = raw?;

    info!(
        "Layer '{}': {} features, reference system {}",
        raw.name,
        raw.features.len(),
        raw.crs
            .map(|c| c.to_string())
            .unwrap_or_else(|| "undeclared".to_string())
    );

    Ok(raw)
}

async fn read_features(pool: &SqlitePool, layer: &str) -> Result<RawLayer> {
    let registered = sqlx::query(
        "SELECT column_name, srs_id FROM gpkg_geometry_columns WHERE table_name = ?",
    )
    .bind(layer)
    .fetch_optional(pool)
    .await
    .context("Not a GeoPackage: gpkg_geometry_columns is missing")?;

    let Some(registered) = registered else {
        bail!("No feature layer named '{}'", layer);
    };
    let geometry_column: String = registered.try_get("column_name")?;
    let srs_id: i64 = registered.try_get("srs_id")?;
    let crs = layer_crs(pool, srs_id).await?;

    let columns: Vec<ColumnInfo> = sqlx::query(&format!("PRAGMA table_info({})", quote(layer)))
        .fetch_all(pool)
        .await?
        .iter()
        .map(|row| {
            Ok(ColumnInfo {
                name: row.try_get("name")?,
                declared: row.try_get::<String, _>("type")?.to_ascii_uppercase(),
                primary_key: row.try_get::<i64, _>("pk")? > 0,
            })
        })
        .collect::<Result<_, sqlx::Error>>()?;

    let primary_key = columns.iter().find(|c| c.primary_key);
    let attributes: Vec<&ColumnInfo> = columns
        .iter()
        .filter(|c| !c.primary_key && c.name != geometry_column)
        .collect();

    let mut select: Vec<String> = vec![quote(&geometry_column)];
    select.extend(attributes.iter().map(|c| quote(&c.name)));
    let mut sql = format!("SELECT {} FROM {}", select.join(", "), quote(layer));
    if let Some(pk) = primary_key {
        sql.push_str(&format!(" ORDER BY {}", quote(&pk.name)));
    }

    let rows = sqlx::query(&sql).fetch_all(pool).await?;

    let mut features = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let blob: Option<Vec<u8>> = row.try_get_unchecked(0)?;
        let position = blob.and_then(position_of);
        if position.is_none() {
            debug!("Feature {} of '{}' has no usable geometry", i, layer);
        }

        let mut properties = Properties::new();
        for (offset, column) in attributes.iter().enumerate() {
            let value = attribute_value(row, offset + 1, &column.declared)?;
            properties.insert(column.name.clone(), value);
        }

        features.push(RawFeature {
            position,
            properties,
        });
    }

    Ok(RawLayer {
        name: layer.to_string(),
        crs,
        features,
    })
}

/// Resolve a layer's srs_id through `gpkg_spatial_ref_sys`
async fn layer_crs(pool: &SqlitePool, srs_id: i64) -> Result<Option<Crs>> {
    // -1 and 0 are the undefined cartesian and geographic systems
    if srs_id <= 0 {
        return Ok(None);
    }

    let row = sqlx::query(
        "SELECT organization, organization_coordsys_id FROM gpkg_spatial_ref_sys WHERE srs_id = ?",
    )
    .bind(srs_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        bail!("Reference system {} is not defined in gpkg_spatial_ref_sys", srs_id);
    };
    let organization: String = row.try_get("organization")?;
    let code: i64 = row.try_get("organization_coordsys_id")?;

    Crs::parse(&format!("{}:{}", organization, code)).map(Some)
}

/// Point coordinates, or the centroid for any other geometry kind
fn position_of(blob: Vec<u8>) -> Option<Coord<f64>> {
    let geometry = GpkgWkb(blob).to_geo().ok()?;
    let c = match geometry {
        geo::Geometry::Point(p) => p.0,
        other => other.centroid()?.0,
    };
    // Empty points are stored as NaN coordinates
    (c.x.is_finite() && c.y.is_finite()).then_some(c)
}

fn attribute_value(row: &SqliteRow, index: usize, declared: &str) -> Result<JsonValue> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(JsonValue::Null);
    }
    let storage = raw.type_info().name().to_string();

    let value = match storage.as_str() {
        "BOOLEAN" => json!(row.try_get_unchecked::<i64, _>(index)? != 0),
        "INTEGER" if declared.contains("BOOL") => {
            json!(row.try_get_unchecked::<i64, _>(index)? != 0)
        }
        "INTEGER" => json!(row.try_get_unchecked::<i64, _>(index)?),
        "REAL" | "NUMERIC" => json!(row.try_get_unchecked::<f64, _>(index)?),
        // Non-geometry blobs are not carried
        "BLOB" => JsonValue::Null,
        _ => JsonValue::String(row.try_get_unchecked::<String, _>(index)?),
    };
    Ok(value)
}

/// Type a raw layer into addresses keyed by `key_field`.
///
/// Fails when no feature carries the key attribute at all.
pub fn load_addresses(raw: RawLayer, key_field: &str) -> Result<PointLayer<Address>> {
    if !raw.features.is_empty()
        && !raw
            .features
            .iter()
            .any(|f| f.properties.contains_key(key_field))
    {
        bail!("Layer '{}' has no '{}' attribute", raw.name, key_field);
    }

    let mut missing_keys = 0usize;
    let features: Vec<Address> = raw
        .features
        .into_iter()
        .enumerate()
        .map(|(row, f)| {
            let key = property_as_string(&f.properties, key_field).unwrap_or_else(|| {
                missing_keys += 1;
                String::new()
            });
            Address {
                row,
                key,
                position: f.position,
                properties: f.properties,
            }
        })
        .collect();

    if missing_keys > 0 {
        warn!(
            "{} features of '{}' have no '{}' value",
            missing_keys, raw.name, key_field
        );
    }

    Ok(PointLayer::new(raw.name, raw.crs, features))
}

/// Type a raw layer into gates; the fid is the row position in read order
pub fn load_gates(raw: RawLayer, category_field: &str) -> PointLayer<Gate> {
    let features: Vec<Gate> = raw
        .features
        .into_iter()
        .enumerate()
        .map(|(fid, f)| Gate {
            fid,
            category: property_as_string(&f.properties, category_field).unwrap_or_default(),
            position: f.position,
        })
        .collect();

    PointLayer::new(raw.name, raw.crs, features)
}

fn property_as_string(properties: &Properties, field: &str) -> Option<String> {
    match properties.get(field)? {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Widest SQLite type seen in a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ColumnKind {
    Boolean,
    Integer,
    Real,
    Text,
}

impl ColumnKind {
    fn of(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Null => None,
            JsonValue::Bool(_) => Some(ColumnKind::Boolean),
            JsonValue::Number(n) if n.is_i64() || n.is_u64() => Some(ColumnKind::Integer),
            JsonValue::Number(_) => Some(ColumnKind::Real),
            _ => Some(ColumnKind::Text),
        }
    }

    fn sql(self) -> &'static str {
        match self {
            ColumnKind::Boolean => "BOOLEAN",
            ColumnKind::Integer => "INTEGER",
            ColumnKind::Real => "REAL",
            ColumnKind::Text => "TEXT",
        }
    }
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &JsonValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        JsonValue::Null => query.bind(None::<String>),
        JsonValue::Bool(b) => query.bind(*b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64()),
        },
        JsonValue::String(s) => query.bind(s.clone()),
        other => query.bind(other.to_string()),
    }
}

fn encode_point(c: Coord<f64>, srs_id: i64) -> Result<Vec<u8>> {
    let srid = i32::try_from(srs_id).ok();
    geo::Geometry::Point(Point::from(c))
        .to_gpkg_wkb(CoordDimensions::xy(), srid, Vec::new())
        .context("Failed to encode point geometry")
}

/// Write a point layer as a new GeoPackage at `path`, replacing any existing file.
///
/// Attribute columns are the union of all feature properties; each column
/// takes the widest type among its values.
pub async fn write_layer(path: &Path, layer: &RawLayer) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    if path.exists() {
        fs::remove_file(path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;
    }

    let pool = open(path, true).await?;
    let written = write_features(&pool, layer)
        .await
        .with_context(|| format!("Failed to write layer '{}' to {}", layer.name, path.display()));
    pool.close().await;
    written
}

async fn write_features(pool: &SqlitePool, layer: &RawLayer) -> Result<()> {
    let mut columns: Vec<(String, Option<ColumnKind>)> = Vec::new();
    for feature in &layer.features {
        for (name, value) in &feature.properties {
            let kind = ColumnKind::of(value);
            match columns.iter_mut().find(|(n, _)| n == name) {
                Some((_, seen)) => *seen = (*seen).max(kind),
                None => columns.push((name.clone(), kind)),
            }
        }
    }
    columns.retain(|(name, _)| {
        let reserved = name.eq_ignore_ascii_case(FID_COLUMN)
            || name.eq_ignore_ascii_case(GEOMETRY_COLUMN);
        if reserved {
            warn!("Attribute '{}' clashes with a reserved column, dropped", name);
        }
        !reserved
    });

    let srs_id = layer.crs.map(|c| i64::from(c.epsg())).unwrap_or(UNDEFINED_SRS);

    sqlx::query(&format!("PRAGMA application_id = {}", GPKG_APPLICATION_ID))
        .execute(pool)
        .await?;
    sqlx::query(&format!("PRAGMA user_version = {}", GPKG_USER_VERSION))
        .execute(pool)
        .await?;

    let mut tx = pool.begin().await?;

    for statement in GPKG_SCHEMA {
        sqlx::query(statement).execute(&mut *tx).await?;
    }

    let insert_srs = "INSERT OR IGNORE INTO gpkg_spatial_ref_sys
        (srs_name, srs_id, organization, organization_coordsys_id, definition, description)
        VALUES (?, ?, ?, ?, ?, ?)";
    sqlx::query(insert_srs)
        .bind("Undefined cartesian SRS")
        .bind(-1i64)
        .bind("NONE")
        .bind(-1i64)
        .bind("undefined")
        .bind("undefined cartesian coordinate reference system")
        .execute(&mut *tx)
        .await?;
    sqlx::query(insert_srs)
        .bind("Undefined geographic SRS")
        .bind(0i64)
        .bind("NONE")
        .bind(0i64)
        .bind("undefined")
        .bind("undefined geographic coordinate reference system")
        .execute(&mut *tx)
        .await?;
    sqlx::query(insert_srs)
        .bind("WGS 84 geodetic")
        .bind(4326i64)
        .bind("EPSG")
        .bind(4326i64)
        .bind(WGS84_WKT)
        .bind("longitude/latitude coordinates in decimal degrees on the WGS 84 spheroid")
        .execute(&mut *tx)
        .await?;
    if let Some(crs) = layer.crs {
        sqlx::query(insert_srs)
            .bind(crs.to_string())
            .bind(srs_id)
            .bind("EPSG")
            .bind(srs_id)
            .bind("undefined")
            .bind(None::<String>)
            .execute(&mut *tx)
            .await?;
    }

    let mut definitions = vec![format!(
        "{} INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL",
        quote(FID_COLUMN)
    )];
    definitions.push(format!("{} POINT", quote(GEOMETRY_COLUMN)));
    definitions.extend(columns.iter().map(|(name, kind)| {
        format!(
            "{} {}",
            quote(name),
            kind.unwrap_or(ColumnKind::Text).sql()
        )
    }));
    sqlx::query(&format!(
        "CREATE TABLE {} ({})",
        quote(&layer.name),
        definitions.join(", ")
    ))
    .execute(&mut *tx)
    .await?;

    let positions: Vec<Coord<f64>> = layer.features.iter().filter_map(|f| f.position).collect();
    let bounds = positions.iter().fold(None, |acc: Option<[f64; 4]>, c| {
        Some(match acc {
            None => [c.x, c.y, c.x, c.y],
            Some([min_x, min_y, max_x, max_y]) => {
                [min_x.min(c.x), min_y.min(c.y), max_x.max(c.x), max_y.max(c.y)]
            }
        })
    });

    sqlx::query(
        "INSERT INTO gpkg_contents (table_name, data_type, identifier, min_x, min_y, max_x, max_y, srs_id)
         VALUES (?, 'features', ?, ?, ?, ?, ?, ?)",
    )
    .bind(layer.name.as_str())
    .bind(layer.name.as_str())
    .bind(bounds.map(|b| b[0]))
    .bind(bounds.map(|b| b[1]))
    .bind(bounds.map(|b| b[2]))
    .bind(bounds.map(|b| b[3]))
    .bind(srs_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO gpkg_geometry_columns (table_name, column_name, geometry_type_name, srs_id, z, m)
         VALUES (?, ?, 'POINT', ?, 0, 0)",
    )
    .bind(layer.name.as_str())
    .bind(GEOMETRY_COLUMN)
    .bind(srs_id)
    .execute(&mut *tx)
    .await?;

    let mut insert_columns = vec![quote(GEOMETRY_COLUMN)];
    insert_columns.extend(columns.iter().map(|(name, _)| quote(name)));
    let insert = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote(&layer.name),
        insert_columns.join(", "),
        vec!["?"; insert_columns.len()].join(", ")
    );

    for feature in &layer.features {
        let geometry = feature
            .position
            .map(|c| encode_point(c, srs_id))
            .transpose()?;
        let mut query = sqlx::query(&insert).bind(geometry);
        for (name, _) in &columns {
            query = bind_value(
                query,
                feature.properties.get(name).unwrap_or(&JsonValue::Null),
            );
        }
        query.execute(&mut *tx).await?;
    }

    tx.commit().await?;

    info!(
        "Wrote {} features to layer '{}'",
        layer.features.len(),
        layer.name
    );
    Ok(())
}

/// Write every address with its verdict as layer `layer` of a new GeoPackage
pub async fn write_results(
    path: &Path,
    layer: &str,
    addresses: &PointLayer<Address>,
    results: &[AddressResult],
    output: &OutputConfig,
) -> Result<()> {
    if addresses.len() != results.len() {
        bail!(
            "Expected {} address results, got {}",
            addresses.len(),
            results.len()
        );
    }

    let features: Vec<RawFeature> = addresses
        .features
        .iter()
        .zip(results)
        .map(|(address, result)| {
            let mut properties = address.properties.clone();
            properties.insert(output.qualified_column.clone(), json!(result.qualified));
            properties.insert(output.distance_column.clone(), json!(result.distance_m));
            RawFeature {
                position: address.position,
                properties,
            }
        })
        .collect();

    let raw = RawLayer {
        name: layer.to_string(),
        crs: addresses.crs,
        features,
    };
    write_layer(path, &raw).await?;

    info!("Wrote {} addresses to {}", results.len(), path.display());
    Ok(())
}
