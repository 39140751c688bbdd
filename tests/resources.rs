use seq2seq_nmt::resources::{LocalResource, ResourceProvider};
use std::fs;

#[test]
fn test_local_resource() -> anyhow::Result<()> {
    //    Given
    let directory = tempfile::tempdir()?;
    let corpus_path = directory.path().join("spa.txt");
    fs::write(&corpus_path, "Go.\tVe.\n")?;

    //    When
    let present = LocalResource::from(corpus_path.clone());
    let missing = LocalResource::from(directory.path().join("missing.txt"));

    //    Then
    assert_eq!(present.get_local_path()?, corpus_path);
    assert!(missing.get_local_path().is_err());
    Ok(())
}

#[test]
#[cfg(feature = "remote")]
#[cfg_attr(not(feature = "all-tests"), ignore)]
fn test_download_corpus() -> anyhow::Result<()> {
    use seq2seq_nmt::dataset::{load_sentence_pairs, DatasetResources};
    use seq2seq_nmt::preprocessing::SentencePreprocessor;
    use seq2seq_nmt::resources::RemoteResource;

    //    Given
    let corpus_resource = RemoteResource::from_archive(DatasetResources::SPA_ENG);

    //    When
    let corpus_path = corpus_resource.get_local_path()?;
    let pairs = load_sentence_pairs(&corpus_path, Some(100), &SentencePreprocessor::new()?)?;

    //    Then
    assert!(corpus_path.ends_with("spa-eng/spa.txt"));
    assert_eq!(pairs.len(), 100);
    assert_eq!(pairs[0].target, "<start> go . <end>");
    Ok(())
}
