// SPDX-License-Identifier: GPL-3.0-only

//! Image location strings
//!
//! Clone sources are addressed as `rbd://<fsid>/<pool>/<image>/<snapshot>`
//! with every segment percent-encoded. Export sources only carry the
//! `/<pool>/<image>/<snapshot>` path of a generic URL.

use percent_encoding::percent_decode_str;
use url::Url;

use crate::error::{DriverError, Result};

pub const RBD_URL_PREFIX: &str = "rbd://";

/// A volume, optionally pinned to a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VolumeIdentity {
    pub pool: String,
    pub name: String,
    pub snapshot: Option<String>,
}

/// Parsed `rbd://` clone source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotLocation {
    pub cluster_id: String,
    pub pool: String,
    pub image: String,
    pub snapshot: String,
}

impl SnapshotLocation {
    pub fn identity(&self) -> VolumeIdentity {
        VolumeIdentity {
            pool: self.pool.clone(),
            name: self.image.clone(),
            snapshot: Some(self.snapshot.clone()),
        }
    }
}

/// Where an image lives, as handed over by the image service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLocation {
    pub url: String,
}

impl ImageLocation {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// The subset of image metadata the driver looks at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageMeta {
    pub disk_format: String,
}

impl ImageMeta {
    pub fn new(disk_format: impl Into<String>) -> Self {
        Self {
            disk_format: disk_format.into(),
        }
    }
}

fn decode_segments(location: &str, raw: &str) -> Result<Vec<String>> {
    raw.split('/')
        .map(|segment| {
            percent_decode_str(segment)
                .decode_utf8()
                .map(|decoded| decoded.into_owned())
                .map_err(|_| DriverError::format(location, "Invalid UTF-8 in components"))
        })
        .collect()
}

/// Split an `rbd://fsid/pool/image/snapshot` URL into its decoded parts
pub fn parse_location_url(url: &str) -> Result<SnapshotLocation> {
    let Some(rest) = url.strip_prefix(RBD_URL_PREFIX) else {
        return Err(DriverError::format(url, "Not stored in rbd"));
    };

    let pieces = decode_segments(url, rest)?;
    if pieces.iter().any(String::is_empty) {
        return Err(DriverError::format(url, "Blank components"));
    }

    match <[String; 4]>::try_from(pieces) {
        Ok([cluster_id, pool, image, snapshot]) => Ok(SnapshotLocation {
            cluster_id,
            pool,
            image,
            snapshot,
        }),
        Err(_) => Err(DriverError::format(url, "Not an rbd snapshot")),
    }
}

/// Take `pool`, `image` and `snapshot` from the path of an export URL
pub fn parse_export_path(url: &Url) -> Result<VolumeIdentity> {
    let path = url.path().strip_prefix('/').unwrap_or(url.path());
    let pieces = decode_segments(url.as_str(), path)?;
    if pieces.iter().any(String::is_empty) {
        return Err(DriverError::format(url.as_str(), "Blank components"));
    }

    match <[String; 3]>::try_from(pieces) {
        Ok([pool, name, snapshot]) => Ok(VolumeIdentity {
            pool,
            name,
            snapshot: Some(snapshot),
        }),
        Err(_) => Err(DriverError::format(
            url.as_str(),
            "Expected /pool/image/snapshot",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reason(result: Result<SnapshotLocation>) -> String {
        match result {
            Err(DriverError::Format { reason, .. }) => reason,
            other => panic!("expected format error, got {other:?}"),
        }
    }

    #[test]
    fn parses_four_segments_in_order() {
        let location = parse_location_url("rbd://fsid/pool/image/snap").unwrap();
        assert_eq!(
            location,
            SnapshotLocation {
                cluster_id: "fsid".into(),
                pool: "pool".into(),
                image: "image".into(),
                snapshot: "snap".into(),
            }
        );
    }

    #[test]
    fn decodes_percent_escapes() {
        let location = parse_location_url("rbd://f%20s/p%2Fq/img%40x/s%25").unwrap();
        assert_eq!(location.cluster_id, "f s");
        assert_eq!(location.pool, "p/q");
        assert_eq!(location.image, "img@x");
        assert_eq!(location.snapshot, "s%");
    }

    #[test]
    fn rejects_other_schemes() {
        assert_eq!(
            reason(parse_location_url("http://fsid/pool/image/snap")),
            "Not stored in rbd"
        );
        assert_eq!(reason(parse_location_url("fsid/pool/image/snap")), "Not stored in rbd");
    }

    #[test]
    fn rejects_blank_components() {
        for url in [
            "rbd://",
            "rbd://fsid//image/snap",
            "rbd://fsid/pool/image/",
            "rbd:///pool/image/snap",
        ] {
            assert_eq!(reason(parse_location_url(url)), "Blank components", "{url}");
        }
    }

    #[test]
    fn rejects_wrong_segment_count() {
        for url in ["rbd://fsid/pool/image", "rbd://fsid/pool/image/snap/extra", "rbd://a"] {
            assert_eq!(reason(parse_location_url(url)), "Not an rbd snapshot", "{url}");
        }
    }

    #[test]
    fn identity_pins_snapshot() {
        let identity = parse_location_url("rbd://fsid/pool/image/snap")
            .unwrap()
            .identity();
        assert_eq!(identity.pool, "pool");
        assert_eq!(identity.name, "image");
        assert_eq!(identity.snapshot.as_deref(), Some("snap"));
    }

    #[test]
    fn parses_export_path() {
        let url = Url::parse("rbd://ignored/images/disk-1/snap").unwrap();
        let identity = parse_export_path(&url).unwrap();
        assert_eq!(identity.pool, "images");
        assert_eq!(identity.name, "disk-1");
        assert_eq!(identity.snapshot.as_deref(), Some("snap"));
    }

    #[test]
    fn rejects_short_export_path() {
        let url = Url::parse("rbd://ignored/images/disk-1").unwrap();
        assert!(matches!(
            parse_export_path(&url),
            Err(DriverError::Format { .. })
        ));
    }
}
