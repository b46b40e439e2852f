//! GeoJSON annotation loader.
//!
//! Reads the FeatureCollection exports written by QuPath and similar tools.
//! Each `Polygon` feature becomes one [`Annotation`]; a `MultiPolygon` is
//! split into one annotation per member polygon, in order. The label is the
//! feature's `classification` (either `{"name": ...}` or a plain string),
//! falling back to its `name` property. Features without a label or with
//! non-areal geometry are skipped.
//!
//! [`save_geojson`] writes annotations back as a FeatureCollection with
//! closed rings and a `{"name": label}` classification, which this loader
//! and QuPath both read.

use std::path::Path;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::AnnotationLoadError;

use super::geometry::{Point, Polygon};
use super::index::Annotation;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Document {
    Tagged(TaggedDocument),
    Features(Vec<Feature>),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum TaggedDocument {
    FeatureCollection { features: Vec<Feature> },
    Feature(Feature),
}

#[derive(Debug, Deserialize)]
struct Feature {
    geometry: Option<Geometry>,
    #[serde(default)]
    properties: Option<Properties>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum Geometry {
    Polygon { coordinates: Vec<Ring> },
    MultiPolygon { coordinates: Vec<Vec<Ring>> },
    #[serde(other)]
    Other,
}

type Ring = Vec<Vec<f64>>;

#[derive(Debug, Default, Deserialize)]
struct Properties {
    classification: Option<Classification>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Classification {
    Named { name: String },
    Plain(String),
}

impl Properties {
    fn label(&self) -> Option<&str> {
        let classified = match &self.classification {
            Some(Classification::Named { name }) | Some(Classification::Plain(name)) => Some(name),
            None => None,
        };
        classified
            .or(self.name.as_ref())
            .map(String::as_str)
            .filter(|label| !label.is_empty())
    }
}

/// Load annotations from a GeoJSON file.
pub async fn load_geojson(path: impl AsRef<Path>) -> Result<Vec<Annotation>, AnnotationLoadError> {
    let path = path.as_ref();
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| AnnotationLoadError::Read {
            path: path.display().to_string(),
            source,
        })?;
    let annotations = parse_geojson(&text)?;
    debug!(
        path = %path.display(),
        annotations = annotations.len(),
        "Loaded GeoJSON annotations"
    );
    Ok(annotations)
}

/// Parse annotations from GeoJSON text.
pub fn parse_geojson(text: &str) -> Result<Vec<Annotation>, AnnotationLoadError> {
    let features = match serde_json::from_str::<Document>(text)? {
        Document::Tagged(TaggedDocument::FeatureCollection { features }) => features,
        Document::Tagged(TaggedDocument::Feature(feature)) => vec![feature],
        Document::Features(features) => features,
    };

    let mut annotations = Vec::new();
    let mut skipped = 0usize;

    for feature in &features {
        let label = feature.properties.as_ref().and_then(Properties::label);
        let (Some(label), Some(geometry)) = (label, &feature.geometry) else {
            skipped += 1;
            continue;
        };

        match geometry {
            Geometry::Polygon { coordinates } => {
                annotations.push(Annotation::new(label, polygon(coordinates)?));
            }
            Geometry::MultiPolygon { coordinates } => {
                for rings in coordinates {
                    annotations.push(Annotation::new(label, polygon(rings)?));
                }
            }
            Geometry::Other => skipped += 1,
        }
    }

    if skipped > 0 {
        debug!(skipped, "Skipped unlabeled or non-polygon features");
    }
    Ok(annotations)
}

/// Build a GeoJSON FeatureCollection from annotations.
pub fn to_geojson(annotations: &[Annotation]) -> Value {
    let features: Vec<Value> = annotations
        .iter()
        .map(|annotation| {
            let polygon = &annotation.polygon;
            let rings: Vec<Value> = std::iter::once(&polygon.exterior)
                .chain(&polygon.holes)
                .map(|ring| closed_ring(ring))
                .collect();
            json!({
                "type": "Feature",
                "geometry": { "type": "Polygon", "coordinates": rings },
                "properties": {
                    "objectType": "annotation",
                    "classification": { "name": annotation.label },
                },
            })
        })
        .collect();
    json!({ "type": "FeatureCollection", "features": features })
}

fn closed_ring(ring: &[Point]) -> Value {
    let mut positions: Vec<[f64; 2]> = ring.iter().map(|p| [p.x, p.y]).collect();
    if let (Some(&first), Some(&last)) = (positions.first(), positions.last()) {
        if first != last {
            positions.push(first);
        }
    }
    json!(positions)
}

/// Write annotations to a GeoJSON file.
pub async fn save_geojson(
    path: impl AsRef<Path>,
    annotations: &[Annotation],
) -> Result<(), AnnotationLoadError> {
    let path = path.as_ref();
    let text = serde_json::to_string_pretty(&to_geojson(annotations))?;
    tokio::fs::write(path, text)
        .await
        .map_err(|source| AnnotationLoadError::Write {
            path: path.display().to_string(),
            source,
        })?;
    debug!(
        path = %path.display(),
        annotations = annotations.len(),
        "Saved GeoJSON annotations"
    );
    Ok(())
}

fn polygon(rings: &[Ring]) -> Result<Polygon, AnnotationLoadError> {
    let mut rings = rings.iter().map(|ring| points(ring));
    let exterior = rings
        .next()
        .ok_or_else(|| AnnotationLoadError::Unsupported("polygon without rings".to_string()))??;
    let holes = rings.collect::<Result<Vec<_>, _>>()?;
    Ok(Polygon::with_holes(exterior, holes))
}

fn points(ring: &Ring) -> Result<Vec<Point>, AnnotationLoadError> {
    ring.iter()
        .map(|position| match position.as_slice() {
            [x, y, ..] => Ok(Point::new(*x, *y)),
            _ => Err(AnnotationLoadError::Unsupported(format!(
                "position with {} coordinates",
                position.len()
            ))),
        })
        .collect()
}
