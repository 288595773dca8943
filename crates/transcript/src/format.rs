use std::fmt::Write;

use crate::Transcript;

/// One of the five artifact serializations stored under a job's `output/`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OutputFormat {
    Json,
    Txt,
    Srt,
    Vtt,
    Md,
}

impl OutputFormat {
    pub fn file_name(&self) -> &'static str {
        match self {
            OutputFormat::Json => "transcript.json",
            OutputFormat::Txt => "result.txt",
            OutputFormat::Srt => "result.srt",
            OutputFormat::Vtt => "result.vtt",
            OutputFormat::Md => "result.md",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Json => "application/json",
            OutputFormat::Txt => "text/plain; charset=utf-8",
            OutputFormat::Srt => "application/x-subrip",
            OutputFormat::Vtt => "text/vtt",
            OutputFormat::Md => "text/markdown; charset=utf-8",
        }
    }
}

/// Render one artifact from the transcript. Pure: same transcript, same bytes.
pub fn render(transcript: &Transcript, format: OutputFormat) -> crate::Result<String> {
    Ok(match format {
        OutputFormat::Json => transcript.to_json()?,
        OutputFormat::Txt => render_txt(transcript),
        OutputFormat::Srt => render_srt(transcript),
        OutputFormat::Vtt => render_vtt(transcript),
        OutputFormat::Md => render_md(transcript),
    })
}

fn render_txt(transcript: &Transcript) -> String {
    let mut out = String::new();
    for segment in &transcript.segments {
        out.push_str(&segment.text);
        out.push('\n');
    }
    out
}

fn render_srt(transcript: &Transcript) -> String {
    let mut out = String::new();
    for (i, segment) in transcript.segments.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let _ = writeln!(out, "{}", i + 1);
        let _ = writeln!(
            out,
            "{} --> {}",
            timecode(segment.start, ','),
            timecode(segment.end, ',')
        );
        out.push_str(&segment.text);
        out.push('\n');
    }
    out
}

fn render_vtt(transcript: &Transcript) -> String {
    let mut out = String::from("WEBVTT\n\n");
    for (i, segment) in transcript.segments.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let _ = writeln!(
            out,
            "{} --> {}",
            timecode(segment.start, '.'),
            timecode(segment.end, '.')
        );
        out.push_str(&segment.text);
        out.push('\n');
    }
    out
}

fn render_md(transcript: &Transcript) -> String {
    let mut out = String::from("# Transcript\n\n");
    let _ = writeln!(out, "- Duration: {}", timecode(transcript.duration, '.'));
    let _ = writeln!(out, "- Segments: {}", transcript.segments.len());
    let _ = writeln!(out, "- Language: {}", transcript.language);
    out.push('\n');
    for segment in &transcript.segments {
        out.push_str(&segment.text);
        out.push_str("\n\n");
    }
    out
}

/// `HH:MM:SS{sep}mmm`, truncated (not rounded) to millisecond resolution.
fn timecode(seconds: f64, sep: char) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0) as u64;
    let millis = total_ms % 1000;
    let total_secs = total_ms / 1000;
    let secs = total_secs % 60;
    let mins = (total_secs / 60) % 60;
    let hours = total_secs / 3600;
    format!("{:02}:{:02}:{:02}{}{:03}", hours, mins, secs, sep, millis)
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::TranscriptSegment;

    fn sample() -> Transcript {
        Transcript::new(
            "ja",
            8.2,
            vec![
                TranscriptSegment {
                    id: 0,
                    start: 0.0,
                    end: 3.6,
                    text: "おはようございます。".to_string(),
                },
                TranscriptSegment {
                    id: 1,
                    start: 3.6,
                    end: 8.2,
                    text: "会議を始めます。".to_string(),
                },
            ],
        )
    }

    #[test]
    fn timecode_truncates_instead_of_rounding() {
        assert_eq!(timecode(1.2346, ','), "00:00:01,234");
        assert_eq!(timecode(0.9999, '.'), "00:00:00.999");
        assert_eq!(timecode(3661.5, ','), "01:01:01,500");
    }

    #[test]
    fn srt_has_numbered_cues_and_comma_timecodes() {
        let srt = render(&sample(), OutputFormat::Srt).unwrap();
        let expected = "1\n00:00:00,000 --> 00:00:03,600\nおはようございます。\n\n2\n00:00:03,600 --> 00:00:08,200\n会議を始めます。\n";
        assert_eq!(srt, expected);
    }

    #[test]
    fn vtt_has_header_and_dot_timecodes() {
        let vtt = render(&sample(), OutputFormat::Vtt).unwrap();
        assert!(vtt.starts_with("WEBVTT\n\n"));
        assert!(vtt.contains("00:00:00.000 --> 00:00:03.600"));
        assert!(!vtt.contains(','));
    }

    #[test]
    fn txt_is_newline_joined_with_trailing_newline() {
        let txt = render(&sample(), OutputFormat::Txt).unwrap();
        assert_eq!(txt, "おはようございます。\n会議を始めます。\n");
    }

    #[test]
    fn md_has_title_and_metadata() {
        let md = render(&sample(), OutputFormat::Md).unwrap();
        assert!(md.starts_with("# Transcript\n"));
        assert!(md.contains("- Segments: 2"));
        assert!(md.contains("- Duration: 00:00:08.200"));
    }

    #[test]
    fn rendering_is_pure() {
        let t = sample();
        for format in [
            OutputFormat::Json,
            OutputFormat::Txt,
            OutputFormat::Srt,
            OutputFormat::Vtt,
            OutputFormat::Md,
        ] {
            assert_eq!(
                render(&t, format).unwrap(),
                render(&t, format).unwrap(),
                "{format} must be deterministic"
            );
        }
    }

    #[test]
    fn format_parses_from_query_strings() {
        assert_eq!(OutputFormat::from_str("srt").unwrap(), OutputFormat::Srt);
        assert_eq!(OutputFormat::from_str("json").unwrap(), OutputFormat::Json);
        assert!(OutputFormat::from_str("docx").is_err());
    }
}
