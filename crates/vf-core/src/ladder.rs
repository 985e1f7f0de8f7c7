//! The fixed HLS quality ladder.

use serde::Serialize;

/// One rendition of the ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QualityRung {
    pub quality: &'static str,
    pub width: u32,
    pub height: u32,
    /// Target video bitrate in bits per second.
    pub bitrate: u64,
}

/// Every video is encoded at each of these rungs, highest first.
pub static QUALITY_LADDER: [QualityRung; 4] = [
    QualityRung {
        quality: "1080p",
        width: 1920,
        height: 1080,
        bitrate: 5_000_000,
    },
    QualityRung {
        quality: "720p",
        width: 1280,
        height: 720,
        bitrate: 2_800_000,
    },
    QualityRung {
        quality: "480p",
        width: 854,
        height: 480,
        bitrate: 1_400_000,
    },
    QualityRung {
        quality: "360p",
        width: 640,
        height: 360,
        bitrate: 800_000,
    },
];

impl QualityRung {
    /// Look up a rung by its quality label.
    pub fn find(quality: &str) -> Option<&'static QualityRung> {
        QUALITY_LADDER.iter().find(|r| r.quality == quality)
    }

    /// `WIDTHxHEIGHT`, as used in `RESOLUTION=` attributes.
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }

    /// Peak rate handed to the encoder (7% headroom over the target).
    pub fn maxrate(&self) -> u64 {
        self.bitrate * 107 / 100
    }

    /// Rate-control buffer size (1.5x the target).
    pub fn bufsize(&self) -> u64 {
        self.bitrate * 3 / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_is_fixed() {
        let qualities: Vec<_> = QUALITY_LADDER.iter().map(|r| r.quality).collect();
        assert_eq!(qualities, vec!["1080p", "720p", "480p", "360p"]);
        assert_eq!(QUALITY_LADDER[2].resolution(), "854x480");
    }

    #[test]
    fn find_rung() {
        assert_eq!(QualityRung::find("720p").unwrap().bitrate, 2_800_000);
        assert!(QualityRung::find("4k").is_none());
    }

    #[test]
    fn rate_control_values() {
        let rung = QualityRung::find("1080p").unwrap();
        assert_eq!(rung.maxrate(), 5_350_000);
        assert_eq!(rung.bufsize(), 7_500_000);
    }
}
