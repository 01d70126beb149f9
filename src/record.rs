//! Construction of catalog records from spatial metadata.
//!
//! Every tile or mask row goes through [`TileRecord`] or [`MaskRecord`], so
//! the column mapping is the same whether the bounds came from a whole raster
//! or a patch of one.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone};
use rusqlite::types::Value;

use crate::db::{Entity, Insertable, MaskTask, Tile};
use crate::error::{Result, TileBankError};
use crate::spatial::{Affine, Bounds, Crs};

/// Anything that can be turned into a catalog date.
#[derive(Debug, Clone)]
pub enum DateInput {
    Date(NaiveDate),
    Text(String),
}

impl From<NaiveDate> for DateInput {
    fn from(d: NaiveDate) -> Self {
        DateInput::Date(d)
    }
}

impl From<NaiveDateTime> for DateInput {
    fn from(dt: NaiveDateTime) -> Self {
        DateInput::Date(dt.date())
    }
}

impl<Tz: TimeZone> From<DateTime<Tz>> for DateInput {
    fn from(dt: DateTime<Tz>) -> Self {
        DateInput::Date(dt.date_naive())
    }
}

impl From<&str> for DateInput {
    fn from(s: &str) -> Self {
        DateInput::Text(s.to_string())
    }
}

impl From<String> for DateInput {
    fn from(s: String) -> Self {
        DateInput::Text(s)
    }
}

impl From<&String> for DateInput {
    fn from(s: &String) -> Self {
        DateInput::Text(s.clone())
    }
}

/// `true` for exactly four digits, a dash, two digits, a dash, two digits.
fn has_iso_date_shape(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        })
}

/// Canonicalize a date to `YYYY-MM-DD`. Strings must already be in that
/// form and name a real calendar day.
pub fn parse_date_origin(input: impl Into<DateInput>) -> Result<String> {
    match input.into() {
        DateInput::Date(d) => Ok(d.format("%Y-%m-%d").to_string()),
        DateInput::Text(s) => {
            if !has_iso_date_shape(&s) {
                return Err(TileBankError::InvalidDateFormat(s));
            }
            NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                .map(|d| d.format("%Y-%m-%d").to_string())
                .map_err(|_| TileBankError::InvalidDateFormat(s))
        }
    }
}

/// Optional variant used by operations whose date is not required.
pub fn parse_optional_date(input: Option<DateInput>) -> Result<Option<String>> {
    input.map(parse_date_origin).transpose()
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

fn opt_text(s: Option<&str>) -> Value {
    s.map(text).unwrap_or(Value::Null)
}

fn path_value(path: &Path) -> Value {
    Value::Text(path.to_string_lossy().into_owned())
}

fn bounds_values(prefix: &'static [&'static str; 4], bounds: Option<&Bounds>) -> [(&'static str, Value); 4] {
    let v = |f: fn(&Bounds) -> f64| bounds.map(|b| Value::Real(f(b))).unwrap_or(Value::Null);
    [
        (prefix[0], v(|b| b.min_x)),
        (prefix[1], v(|b| b.min_y)),
        (prefix[2], v(|b| b.max_x)),
        (prefix[3], v(|b| b.max_y)),
    ]
}

const BOUNDS: &[&str; 4] = &["min_x", "min_y", "max_x", "max_y"];
const FOOTPRINT: &[&str; 4] = &["footprint_min_x", "footprint_min_y", "footprint_max_x", "footprint_max_y"];

/// A tile row ready for insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct TileRecord {
    pub path: PathBuf,
    pub satellite_id: i64,
    pub date_origin: Option<String>,
    pub bounds: Bounds,
    pub width: usize,
    pub height: usize,
    pub transform: Affine,
    pub crs: Crs,
    /// Bounds in the catalog's working CRS, when they could be computed.
    pub footprint: Option<Bounds>,
}

impl TileRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        path: impl Into<PathBuf>,
        satellite_id: i64,
        date_origin: Option<String>,
        bounds: Bounds,
        dims: (usize, usize),
        transform: Affine,
        crs: Crs,
        footprint: Option<Bounds>,
    ) -> Self {
        let (width, height) = dims;
        Self {
            path: path.into(),
            satellite_id,
            date_origin,
            bounds,
            width,
            height,
            transform,
            crs,
            footprint,
        }
    }

    /// CRS text destined for the `tile_crs` side table, if there is no EPSG code.
    pub fn crs_text(&self) -> Option<&str> {
        self.crs.wkt()
    }
}

impl Insertable for TileRecord {
    const ENTITY: Entity = Entity::Tile;

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn values(&self) -> Result<Vec<(&'static str, Value)>> {
        let (px, py) = self.transform.pixel_size();
        let mut values = vec![
            ("path", path_value(&self.path)),
            ("satellite_id", Value::Integer(self.satellite_id)),
            ("date_origin", opt_text(self.date_origin.as_deref())),
            ("width", Value::Integer(self.width as i64)),
            ("height", Value::Integer(self.height as i64)),
        ];
        values.extend(bounds_values(BOUNDS, Some(&self.bounds)));
        values.push(("pixel_size_x", Value::Real(px)));
        values.push(("pixel_size_y", Value::Real(py)));
        values.push(("transform", Value::Text(serde_json::to_string(&self.transform)?)));
        values.push((
            "epsg",
            self.crs.epsg().map(|c| Value::Integer(c as i64)).unwrap_or(Value::Null),
        ));
        values.extend(bounds_values(FOOTPRINT, self.footprint.as_ref()));
        Ok(values)
    }
}

/// A mask row. Spatial columns are copied from the parent tile.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskRecord {
    pub path: PathBuf,
    pub tile_id: i64,
    pub timeseries_id: Option<i64>,
    pub task: MaskTask,
    pub mask_type: String,
    pub date_origin: Option<String>,
    pub bounds: Bounds,
    pub transform: Affine,
}

impl MaskRecord {
    pub fn from_parent(
        path: impl Into<PathBuf>,
        tile: &Tile,
        task: MaskTask,
        mask_type: &str,
        date_origin: Option<String>,
        timeseries_id: Option<i64>,
    ) -> Self {
        Self {
            path: path.into(),
            tile_id: tile.id,
            timeseries_id,
            task,
            mask_type: mask_type.to_string(),
            date_origin: date_origin.or_else(|| tile.date_origin.clone()),
            bounds: tile.bounds,
            transform: tile.transform,
        }
    }
}

impl Insertable for MaskRecord {
    const ENTITY: Entity = Entity::Mask;

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn values(&self) -> Result<Vec<(&'static str, Value)>> {
        let mut values = vec![
            ("path", path_value(&self.path)),
            ("tile_id", Value::Integer(self.tile_id)),
            ("timeseries_id", self.timeseries_id.map(Value::Integer).unwrap_or(Value::Null)),
            ("task", text(self.task.as_str())),
            ("mask_type", text(&self.mask_type)),
            ("date_origin", opt_text(self.date_origin.as_deref())),
        ];
        values.extend(bounds_values(BOUNDS, Some(&self.bounds)));
        values.push(("transform", Value::Text(serde_json::to_string(&self.transform)?)));
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, Utc};

    #[test]
    fn test_date_value_and_string_agree() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(parse_date_origin(date).unwrap(), "2024-03-15");
        assert_eq!(parse_date_origin("2024-03-15").unwrap(), "2024-03-15");
        let dt = date.and_time(NaiveTime::from_hms_opt(23, 59, 0).unwrap());
        assert_eq!(parse_date_origin(dt).unwrap(), "2024-03-15");
        assert_eq!(parse_date_origin(Utc.from_utc_datetime(&dt)).unwrap(), "2024-03-15");
    }

    #[test]
    fn test_date_rejects_other_layouts() {
        for bad in ["03-15-2024", "2024/03/15", "2024-3-15", "2024-03-15T00:00:00", " 2024-03-15", "2024-02-30", ""] {
            assert!(
                matches!(parse_date_origin(bad), Err(TileBankError::InvalidDateFormat(_))),
                "{bad:?} accepted"
            );
        }
    }

    #[test]
    fn test_optional_date() {
        assert_eq!(parse_optional_date(None).unwrap(), None);
        assert_eq!(
            parse_optional_date(Some("2023-12-31".into())).unwrap().as_deref(),
            Some("2023-12-31")
        );
    }

    #[test]
    fn test_tile_values_cover_spatial_columns() {
        let transform = Affine::north_up(500000.0, 6000000.0, 10.0, 10.0);
        let record = TileRecord::build(
            "/tmp/x.npy",
            1,
            Some("2024-01-01".into()),
            Bounds::new(500000.0, 5999680.0, 500320.0, 6000000.0),
            (32, 32),
            transform,
            Crs::Epsg(32633),
            None,
        );
        let values = record.values().unwrap();
        let get = |name: &str| values.iter().find(|(k, _)| *k == name).map(|(_, v)| v.clone());

        assert_eq!(get("epsg"), Some(Value::Integer(32633)));
        assert_eq!(get("min_y"), Some(Value::Real(5999680.0)));
        assert_eq!(get("pixel_size_x"), Some(Value::Real(10.0)));
        assert_eq!(get("footprint_max_x"), Some(Value::Null));
        assert_eq!(
            get("transform"),
            Some(Value::Text("[10.0,0.0,500000.0,0.0,-10.0,6000000.0]".into()))
        );
        assert!(record.crs_text().is_none());
    }

    #[test]
    fn test_wkt_tile_has_no_epsg() {
        let record = TileRecord::build(
            "/tmp/y.npy",
            1,
            None,
            Bounds::new(0.0, 0.0, 1.0, 1.0),
            (1, 1),
            Affine::north_up(0.0, 1.0, 1.0, 1.0),
            Crs::Wkt("LOCAL_CS[\"grid\"]".into()),
            None,
        );
        let values = record.values().unwrap();
        assert!(values.contains(&("epsg", Value::Null)));
        assert!(values.contains(&("date_origin", Value::Null)));
        assert_eq!(record.crs_text(), Some("LOCAL_CS[\"grid\"]"));
    }
}
