// Copyright 2024 Guillaume Becquin
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Attention plots
//!
//! Renders the attention weights of a translation as a matrix with one row per predicted word
//! and one column per source word. The matrix can be exported as CSV (to be plotted with any
//! charting tool) or rendered as a shaded text heat map.
//!
//! ```no_run
//! # fn main() -> Result<(), seq2seq_nmt::Seq2SeqError> {
//! use seq2seq_nmt::attention_plot::AttentionPlot;
//! use seq2seq_nmt::checkpoint::CheckpointManager;
//! use seq2seq_nmt::translation::{TranslationConfig, Translator};
//!
//! let checkpoints = CheckpointManager::new("training_checkpoints", None)?;
//! let translator = Translator::from_checkpoint(&checkpoints, TranslationConfig::default())?;
//! let output = translator.evaluate("esta es mi vida.")?;
//!
//! let plot = AttentionPlot::from_output(&output);
//! println!("{}", plot.render_text());
//! plot.save("attention.csv")?;
//! # Ok(())
//! # }
//! ```

use crate::pipelines::preprocessing::split_words;
use crate::pipelines::translation::TranslationOutput;
use crate::Seq2SeqError;
use std::fmt::Write as _;
use std::fs::File;
use std::io::Write;
use std::path::Path;

const SHADES: [char; 5] = [' ', '░', '▒', '▓', '█'];

#[derive(Debug, Clone, PartialEq)]
/// # Attention matrix with its labels
pub struct AttentionPlot {
    /// `matrix[i][j]`: attention of predicted word `i` on source word `j`
    pub matrix: Vec<Vec<f32>>,
    pub source_labels: Vec<String>,
    pub target_labels: Vec<String>,
}

impl AttentionPlot {
    /// Builds the plot of a translation, keeping the columns of the actual source words
    /// (padding positions are dropped).
    pub fn from_output(output: &TranslationOutput) -> AttentionPlot {
        let source_labels: Vec<String> = split_words(&output.sentence)
            .into_iter()
            .map(str::to_string)
            .collect();
        let matrix = output
            .attention
            .iter()
            .take(output.words.len())
            .map(|row| row.iter().take(source_labels.len()).copied().collect())
            .collect();
        AttentionPlot {
            matrix,
            source_labels,
            target_labels: output.words.clone(),
        }
    }

    /// Writes the matrix as CSV: a header with the source words, then one row per predicted word
    /// starting with the word itself.
    pub fn to_csv<W: Write>(&self, writer: W) -> Result<(), Seq2SeqError> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        let mut header = vec![String::new()];
        header.extend(self.source_labels.iter().cloned());
        csv_writer.write_record(&header)?;
        for (label, row) in self.target_labels.iter().zip(&self.matrix) {
            let mut record = vec![label.clone()];
            record.extend(row.iter().map(|weight| format!("{weight:.6}")));
            csv_writer.write_record(&record)?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    /// Saves the matrix as a CSV file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Seq2SeqError> {
        self.to_csv(File::create(path)?)
    }

    /// Text heat map: source words as column headers, predicted words as row labels, and each
    /// cell shaded according to its attention weight.
    pub fn render_text(&self) -> String {
        let label_width = self
            .target_labels
            .iter()
            .map(|label| label.chars().count())
            .max()
            .unwrap_or(0);
        let cell_width = self
            .source_labels
            .iter()
            .map(|label| label.chars().count())
            .max()
            .unwrap_or(1)
            .max(3);

        let mut rendered = String::new();
        let _ = write!(rendered, "{:label_width$} ", "");
        for label in &self.source_labels {
            let _ = write!(rendered, "{label:^cell_width$} ");
        }
        rendered.push('\n');
        for (label, row) in self.target_labels.iter().zip(&self.matrix) {
            let _ = write!(rendered, "{label:>label_width$} ");
            for weight in row {
                let shade = shade(*weight);
                let _ = write!(rendered, "{} ", shade.to_string().repeat(cell_width));
            }
            rendered.push('\n');
        }
        rendered
    }
}

fn shade(weight: f32) -> char {
    let level = (weight.clamp(0.0, 1.0) * (SHADES.len() - 1) as f32).round() as usize;
    SHADES[level]
}

#[cfg(test)]
mod test {
    use super::*;

    fn output() -> TranslationOutput {
        TranslationOutput {
            sentence: "<start> hola . <end>".to_string(),
            words: vec!["hello".to_string(), ".".to_string(), "<end>".to_string()],
            attention: vec![
                vec![0.1, 0.8, 0.05, 0.05, 0.0, 0.0],
                vec![0.0, 0.1, 0.9, 0.0, 0.0, 0.0],
                vec![0.0, 0.0, 0.2, 0.8, 0.0, 0.0],
            ],
            score: None,
        }
    }

    #[test]
    fn padding_columns_are_dropped() {
        let plot = AttentionPlot::from_output(&output());
        assert_eq!(plot.source_labels, vec!["<start>", "hola", ".", "<end>"]);
        assert_eq!(plot.matrix.len(), 3);
        assert!(plot.matrix.iter().all(|row| row.len() == 4));
    }

    #[test]
    fn csv_export() -> anyhow::Result<()> {
        let plot = AttentionPlot::from_output(&output());
        let mut buffer = Vec::new();
        plot.to_csv(&mut buffer)?;
        let content = String::from_utf8(buffer)?;
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], ",<start>,hola,.,<end>");
        assert_eq!(lines[1], "hello,0.100000,0.800000,0.050000,0.050000");
        assert_eq!(lines.len(), 4);
        Ok(())
    }

    #[test]
    fn text_rendering_shades_cells() {
        let plot = AttentionPlot::from_output(&output());
        let rendered = plot.render_text();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains("hola"));
        assert!(lines[1].trim_start().starts_with("hello"));
        assert!(lines[2].contains("███████"));
        assert_eq!(shade(0.0), ' ');
        assert_eq!(shade(1.0), '█');
        assert_eq!(shade(0.5), '▒');
    }
}
