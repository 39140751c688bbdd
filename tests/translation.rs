use seq2seq_nmt::attention_plot::AttentionPlot;
use seq2seq_nmt::checkpoint::CheckpointManager;
use seq2seq_nmt::dataset::{load_sentence_pairs, TranslationDataset};
use seq2seq_nmt::preprocessing::{SentencePreprocessor, END_TOKEN};
use seq2seq_nmt::training::{Trainer, TrainingConfig};
use seq2seq_nmt::translation::{TranslationConfig, Translator};
use seq2seq_nmt::Seq2SeqError;
use std::fs;
use std::path::Path;
use tch::Device;

const CORPUS: &str = "Go away.\tVete.\tCC-BY 2.0\n\
I am cold.\tTengo frío.\tCC-BY 2.0\n\
It is very cold here.\tHace mucho frío aquí.\tCC-BY 2.0\n\
This is my life.\tEsta es mi vida.\tCC-BY 2.0\n\
We are friends.\tSomos amigos.\tCC-BY 2.0\n\
I love you.\tTe quiero.\tCC-BY 2.0\n\
Come in.\tEntra.\tCC-BY 2.0\n\
Are you still at home?\t¿Todavía estás en casa?\tCC-BY 2.0\n";

fn train_to_checkpoint(directory: &Path) -> anyhow::Result<TranslationDataset> {
    let corpus = directory.join("spa.txt");
    fs::write(&corpus, CORPUS)?;
    let preprocessor = SentencePreprocessor::new()?;
    let pairs = load_sentence_pairs(&corpus, None, &preprocessor)?;
    let dataset = TranslationDataset::from_pairs(&pairs, None);
    let model_config = dataset.model_config(16, 32)?;

    let checkpoints = CheckpointManager::new(directory.join("checkpoints"), Some(2))?;
    checkpoints.save_assets(&model_config, &dataset.input_index, &dataset.target_index)?;
    let config = TrainingConfig {
        epochs: 3,
        batch_size: 4,
        checkpoint_every: 1,
        ..Default::default()
    };
    let mut trainer = Trainer::new(&model_config, config, Device::Cpu)?;
    let summaries = trainer.fit(&dataset.as_split(), &Default::default(), Some(&checkpoints))?;
    assert_eq!(summaries.len(), 3);
    Ok(dataset)
}

#[test]
fn translate_from_checkpoint() -> anyhow::Result<()> {
    let directory = tempfile::tempdir()?;
    let dataset = train_to_checkpoint(directory.path())?;
    let checkpoints = CheckpointManager::new(directory.path().join("checkpoints"), Some(2))?;

    let state = checkpoints.state()?;
    assert_eq!(state.checkpoints.len(), 2);
    assert_eq!(state.latest().map(|entry| entry.step), Some(3));

    let translator = Translator::from_checkpoint(
        &checkpoints,
        TranslationConfig {
            device: Device::Cpu,
            ..Default::default()
        },
    )?;
    let output = translator.evaluate("hace mucho frío aquí.")?;

    assert_eq!(output.sentence, "<start> hace mucho frio aqui . <end>");
    assert!(!output.words.is_empty());
    assert!(output.words.len() <= dataset.max_length_target);
    assert_eq!(output.attention.len(), output.words.len());
    for row in &output.attention {
        assert_eq!(row.len(), dataset.max_length_input);
        assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-4);
    }
    if output.words.len() < dataset.max_length_target {
        assert_eq!(output.words.last().map(String::as_str), Some(END_TOKEN));
    }
    assert!(!output.translation().contains(END_TOKEN));

    let plot = AttentionPlot::from_output(&output);
    assert_eq!(plot.source_labels.len(), 7);
    assert_eq!(plot.matrix.len(), output.words.len());
    assert!(plot.matrix.iter().all(|row| row.len() == 7));
    Ok(())
}

#[test]
fn beam_search_translation() -> anyhow::Result<()> {
    let directory = tempfile::tempdir()?;
    train_to_checkpoint(directory.path())?;
    let checkpoints = CheckpointManager::new(directory.path().join("checkpoints"), None)?;

    let translator = Translator::from_checkpoint(
        &checkpoints,
        TranslationConfig {
            device: Device::Cpu,
            num_beams: 3,
            ..Default::default()
        },
    )?;
    let output = translator.evaluate("Esta es mi vida.")?;
    assert!(output.score.is_some());
    assert_eq!(output.attention.len(), output.words.len());

    let translations = translator.translate(&["Te quiero.", "Entra."])?;
    assert_eq!(translations.len(), 2);
    Ok(())
}

#[test]
fn translation_rejects_unknown_words() -> anyhow::Result<()> {
    let directory = tempfile::tempdir()?;
    train_to_checkpoint(directory.path())?;
    let checkpoints = CheckpointManager::new(directory.path().join("checkpoints"), None)?;
    let translator = Translator::from_checkpoint(
        &checkpoints,
        TranslationConfig {
            device: Device::Cpu,
            ..Default::default()
        },
    )?;

    match translator.evaluate("Hace mucho calor.") {
        Err(Seq2SeqError::VocabularyError(message)) => assert!(message.contains("calor")),
        other => panic!("expected a vocabulary error, got {other:?}"),
    }
    let too_long = "hace mucho frío aquí . ".repeat(4);
    assert!(matches!(
        translator.evaluate(&too_long),
        Err(Seq2SeqError::ValueError(_))
    ));
    Ok(())
}

#[test]
fn missing_checkpoint_is_an_error() -> anyhow::Result<()> {
    let directory = tempfile::tempdir()?;
    let checkpoints = CheckpointManager::new(directory.path(), None)?;
    assert!(Translator::from_checkpoint(&checkpoints, TranslationConfig::default()).is_err());
    Ok(())
}
