//! Filename parsing: derive a searchable title and, for episodes, the
//! season/episode numbering from release-style file names.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

static EPISODE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|[\s._-])s(?P<season>\d{1,3})[\s._-]?e(?P<episode>\d{1,3})(?:[\s._-]|$)")
        .expect("static regex")
});

static EPISODE_MARKER_X: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|[\s._-])(?P<season>\d{1,2})x(?P<episode>\d{1,3})(?:[\s._-]|$)")
        .expect("static regex")
});

static YEAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^\d])(?P<year>19\d{2}|20\d{2})(?:[^\d]|$)").expect("static regex")
});

static BRACKETED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\[(][^\[\]()]*[\])]").expect("static regex"));

static RELEASE_GROUP_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*-\s*\w+$").expect("static regex"));

const NOISE_TOKENS: &[&str] = &[
    "2160p", "1080p", "720p", "576p", "480p", "4K", "UHD", "BluRay", "Bluray", "BDRip", "BRRip",
    "WEB-DL", "WEBDL", "WEBRip", "HDTV", "SDTV", "DVDRip", "HDRip", "Remux", "REMUX", "x264",
    "x265", "h264", "h265", "HEVC", "AV1", "10bit", "HDR", "HDR10", "DV", "AAC", "AC3", "EAC3",
    "DTS", "FLAC", "TrueHD", "Atmos",
];

/// Title and numbering derived from a file name alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    pub title: String,
    pub episodic: bool,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub year: Option<u16>,
}

/// Parse a source path's file stem. Episode markers (`S01E02`, `1x02`) make
/// the result episodic, with the title taken from the text before the marker;
/// otherwise the whole cleaned stem is a movie title.
pub fn parse_file_name(path: &Path) -> Option<ParsedName> {
    let stem = path.file_stem()?.to_str()?;
    let year = extract_year(stem);

    if let Some((season, episode, marker_start)) = episode_marker(stem) {
        let raw_title = &stem[..marker_start];
        let title = clean_title(raw_title, year);
        let title = if title.is_empty() {
            // Some releases put the series name on the folder instead.
            parent_name(path).map(|name| clean_title(&name, year)).unwrap_or_default()
        } else {
            title
        };
        if title.is_empty() {
            return None;
        }
        return Some(ParsedName {
            title,
            episodic: true,
            season: Some(season),
            episode: Some(episode),
            year,
        });
    }

    let title = clean_title(stem, year);
    if title.is_empty() {
        return None;
    }
    Some(ParsedName {
        title,
        episodic: false,
        season: None,
        episode: None,
        year,
    })
}

fn parent_name(path: &Path) -> Option<String> {
    path.parent()
        .and_then(|parent| parent.file_name())
        .and_then(|name| name.to_str())
        .map(|name| name.to_string())
}

fn episode_marker(stem: &str) -> Option<(u32, u32, usize)> {
    for pattern in [&*EPISODE_MARKER, &*EPISODE_MARKER_X] {
        if let Some(captures) = pattern.captures(stem) {
            let season = captures.name("season")?.as_str().parse().ok()?;
            let episode = captures.name("episode")?.as_str().parse().ok()?;
            let start = captures.get(0)?.start();
            return Some((season, episode, start));
        }
    }
    None
}

pub fn extract_year(stem: &str) -> Option<u16> {
    let year: u16 = YEAR.captures(stem)?.name("year")?.as_str().parse().ok()?;
    (1900..=2100).contains(&year).then_some(year)
}

fn clean_title(raw: &str, year: Option<u16>) -> String {
    let mut title = BRACKETED.replace_all(raw, " ").to_string();
    title = title.replace(['.', '_'], " ");

    if let Some(year) = year {
        title = title.replace(&year.to_string(), " ");
    }

    for token in NOISE_TOKENS {
        let pattern = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(token))).expect("noise token");
        title = pattern.replace_all(&title, " ").to_string();
    }

    title = RELEASE_GROUP_SUFFIX.replace(&title, "").to_string();

    let collapsed = title.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_matches(|c: char| c.is_whitespace() || c == '-' || c == '_' || c == '(' || c == ')')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn parses_standard_episode_marker() {
        let parsed = parse_file_name(Path::new("Breaking.Bad.S01E02.720p.BluRay.x264.mkv")).unwrap();
        assert!(parsed.episodic);
        assert_eq!(parsed.title, "Breaking Bad");
        assert_eq!(parsed.season, Some(1));
        assert_eq!(parsed.episode, Some(2));
    }

    #[test]
    fn parses_cross_notation() {
        let parsed = parse_file_name(Path::new("The Wire 3x11.mkv")).unwrap();
        assert!(parsed.episodic);
        assert_eq!(parsed.title, "The Wire");
        assert_eq!(parsed.season, Some(3));
        assert_eq!(parsed.episode, Some(11));
    }

    #[test]
    fn falls_back_to_folder_for_series_name() {
        let parsed =
            parse_file_name(Path::new("/library/Severance (2022)/S01E01.mkv")).unwrap();
        assert!(parsed.episodic);
        assert_eq!(parsed.title, "Severance");
    }

    #[test]
    fn parses_movie_with_year_and_noise() {
        let parsed =
            parse_file_name(Path::new("The.Dark.Knight.2008.1080p.BluRay.x264-GROUP.mkv")).unwrap();
        assert!(!parsed.episodic);
        assert_eq!(parsed.title, "The Dark Knight");
        assert_eq!(parsed.year, Some(2008));
    }

    #[test]
    fn strips_bracketed_junk() {
        let parsed = parse_file_name(Path::new("Dune [2021] (Remux).mkv")).unwrap();
        assert_eq!(parsed.title, "Dune");
    }

    #[test]
    fn year_requires_plausible_range() {
        assert_eq!(extract_year("Movie.1899"), None);
        assert_eq!(extract_year("Movie.1900"), Some(1900));
        assert_eq!(extract_year("12345"), None);
    }
}
