//! Bring two point layers into one reference system.

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::crs::Crs;
use crate::models::{Located, PointLayer};

/// Reproject `other` into the reference system declared by `reference`.
///
/// When `reference` declares no system both layers are left untouched and a
/// warning is logged. Running this twice is a no-op the second time.
pub fn normalize<A: Located, B: Located>(
    reference: &PointLayer<A>,
    other: &mut PointLayer<B>,
) -> Result<()> {
    let Some(target) = reference.crs else {
        warn!(
            "Layer '{}' has no declared reference system, geometries left unchanged",
            reference.name
        );
        return Ok(());
    };

    match other.crs {
        Some(source) if source == target => {
            info!(
                "Layers '{}' and '{}' already share {}, no reprojection needed",
                reference.name, other.name, target
            );
            Ok(())
        }
        Some(source) => {
            info!(
                "Reprojecting layer '{}' from {} to {}",
                other.name, source, target
            );
            reproject_layer(other, target)
        }
        None => bail!(
            "Layer '{}' has no declared reference system, cannot reproject it into {}",
            other.name,
            target
        ),
    }
}

/// Reproject every position of `layer` into `target` and record the new system
pub fn reproject_layer<T: Located>(layer: &mut PointLayer<T>, target: Crs) -> Result<()> {
    let Some(source) = layer.crs else {
        bail!("Layer '{}' has no declared reference system", layer.name);
    };

    if source != target {
        for (i, feature) in layer.features.iter_mut().enumerate() {
            if let Some(c) = feature.position_mut() {
                *c = source.transform(&target, *c).with_context(|| {
                    format!(
                        "Failed to reproject feature {} of layer '{}' from {} to {}",
                        i, layer.name, source, target
                    )
                })?;
            }
        }
    }

    layer.crs = Some(target);
    Ok(())
}
