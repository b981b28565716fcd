//! Text reader backed by the `tesseract` command line tool.
//!
//! The image is handed over through a temporary png and the word level TSV report is
//! folded into one candidate per text line, so a plate printed as "AB 123 CD" comes back
//! as a single candidate rather than three words.

use image::GrayImage;
use serde::Deserialize;

use std::process::Command;

use super::TextReader;
use crate::detector::TextCandidate;
use crate::error::LprError;

// tsv `level` of a single word
const WORD_LEVEL: u32 = 5;

pub struct TesseractReader {
    cmd: String,
    language: String,
}

#[derive(Debug, Deserialize)]
struct TsvRow {
    level: u32,
    block_num: u32,
    par_num: u32,
    line_num: u32,
    left: f32,
    top: f32,
    width: f32,
    height: f32,
    conf: f32,
    #[serde(default)]
    text: String,
}

struct Line {
    key: (u32, u32, u32),
    words: Vec<String>,
    min_x: f32,
    min_y: f32,
    max_x: f32,
    max_y: f32,
    min_conf: f32,
}

impl TesseractReader {

    pub fn new(cmd: &str, language: &str) -> Self {
        Self { cmd: cmd.to_string(), language: language.to_string() }
    }
}

impl TextReader for TesseractReader {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    fn read_text(&self, img: &GrayImage) -> Result<Vec<TextCandidate>, LprError> {
        let input = tempfile::Builder::new()
            .prefix("lpr-")
            .suffix(".png")
            .tempfile()?;
        img.save(input.path()).map_err(LprError::image_encode)?;

        let output = Command::new(&self.cmd)
            .arg(input.path())
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .arg("tsv")
            .output()
            .map_err(|e| LprError::backend(format!("could not run {}: {}", self.cmd, e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LprError::backend(format!("{} exited with {}: {}", self.cmd, output.status, stderr.trim())));
        }
        parse_tsv(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Fold a tesseract TSV report into line candidates, in report order.
pub fn parse_tsv(tsv: &str) -> Result<Vec<TextCandidate>, LprError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .quoting(false)
        .flexible(true)
        .from_reader(tsv.as_bytes());

    let mut lines: Vec<Line> = Vec::new();
    for row in reader.deserialize::<TsvRow>() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                log::debug!("skipping tesseract row: {}", e);
                continue;
            }
        };
        let word = row.text.trim();
        if row.level != WORD_LEVEL || row.conf < 0.0 || word.is_empty() {
            continue;
        }

        let key = (row.block_num, row.par_num, row.line_num);
        let (right, bottom) = (row.left + row.width, row.top + row.height);
        match lines.last_mut() {
            Some(line) if line.key == key => {
                line.words.push(word.to_string());
                line.min_x = line.min_x.min(row.left);
                line.min_y = line.min_y.min(row.top);
                line.max_x = line.max_x.max(right);
                line.max_y = line.max_y.max(bottom);
                line.min_conf = line.min_conf.min(row.conf);
            }
            _ => lines.push(Line {
                key,
                words: vec![word.to_string()],
                min_x: row.left,
                min_y: row.top,
                max_x: right,
                max_y: bottom,
                min_conf: row.conf,
            }),
        }
    }

    Ok(lines.into_iter().map(|line| TextCandidate {
        polygon: vec![
            (line.min_x, line.min_y),
            (line.max_x, line.min_y),
            (line.max_x, line.max_y),
            (line.min_x, line.max_y),
        ],
        text: line.words.join(" "),
        confidence: (line.min_conf / 100.0).clamp(0.0, 1.0),
    }).collect())
}


#[cfg(test)]
mod test {

    use super::*;

    const HEADER: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    fn report(rows: &[&str]) -> String {
        let mut tsv = String::from(HEADER);
        for row in rows {
            tsv.push('\n');
            tsv.push_str(row);
        }
        tsv.push('\n');
        tsv
    }

    #[test]
    fn words_on_one_line_become_one_candidate() {
        let tsv = report(&[
            "1\t1\t0\t0\t0\t0\t0\t0\t640\t480\t-1\t",
            "4\t1\t1\t1\t1\t0\t100\t200\t180\t40\t-1\t",
            "5\t1\t1\t1\t1\t1\t100\t200\t60\t40\t91.5\tAB",
            "5\t1\t1\t1\t1\t2\t170\t205\t110\t38\t78\t1234",
            "5\t1\t2\t1\t1\t1\t10\t10\t50\t20\t95\tTAXI",
        ]);
        let candidates = parse_tsv(&tsv).unwrap();
        assert_eq!(candidates.len(), 2);

        let plate = &candidates[0];
        assert_eq!(plate.text, "AB 1234");
        assert!((plate.confidence - 0.78).abs() < 1e-6);
        assert_eq!(plate.polygon, vec![(100.0, 200.0), (280.0, 200.0), (280.0, 243.0), (100.0, 243.0)]);
        assert_eq!(candidates[1].text, "TAXI");
    }

    #[test]
    fn blank_and_unscored_words_are_ignored() {
        let tsv = report(&[
            "5\t1\t1\t1\t1\t1\t0\t0\t10\t10\t-1\tghost",
            "5\t1\t1\t1\t1\t2\t0\t0\t10\t10\t88\t   ",
            "5\t1\t1\t1\t1\t3\t0\t0\t10\t10\t88",
        ]);
        assert!(parse_tsv(&tsv).unwrap().is_empty());
    }

    #[test]
    fn text_with_quotes_is_kept_verbatim() {
        let tsv = report(&["5\t1\t1\t1\t1\t1\t0\t0\t10\t10\t70\t\"AB12CD"]);
        let candidates = parse_tsv(&tsv).unwrap();
        assert_eq!(candidates[0].text, "\"AB12CD");
    }
}
