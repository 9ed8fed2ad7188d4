use assert_cmd::Command;
use plm_embed::EmbeddingMatrix;
use plm_embed_test_data::TestFile;
use tempfile::tempdir;

#[test]
fn test_cli_invalid_source() {
    let (csvfile, _tmp) = TestFile::proteins_01().create_temp().unwrap();
    let dir = tempdir().unwrap();
    let output = dir.path().join("umap.csv");

    let mut cmd = Command::cargo_bin("plm-embed").unwrap();
    cmd.arg("run")
        .arg("--source")
        .arg("onnx")
        .arg("--dataset")
        .arg(&csvfile)
        .arg("--output")
        .arg(&output);

    let assert = cmd.assert().failure();
    let stderr = String::from_utf8_lossy(&assert.get_output().stderr).to_string();
    assert!(stderr.contains("Invalid model source 'onnx'"), "{}", stderr);
    assert!(!output.exists());
}

#[test]
fn test_cli_empty_dataset() {
    let (csvfile, _tmp) = TestFile::proteins_empty().create_temp().unwrap();
    let dir = tempdir().unwrap();
    let output = dir.path().join("umap.csv");

    let mut cmd = Command::cargo_bin("plm-embed").unwrap();
    cmd.arg("run")
        .arg("--dataset")
        .arg(&csvfile)
        .arg("--output")
        .arg(&output);

    cmd.assert().success();
    let text = std::fs::read_to_string(&output).unwrap();
    assert_eq!(text.trim_end(), "protein,x,y");
}

#[test]
fn test_cli_project_saved_embeddings() {
    let (csvfile, _tmp) = TestFile::proteins_numeric_labels().create_temp().unwrap();
    let dir = tempdir().unwrap();
    let embeddings = dir.path().join("embeddings.safetensors");
    let output = dir.path().join("umap.csv");
    let plot = dir.path().join("umap.svg");

    let labels = vec!["101".to_string(), "202".to_string(), "303".to_string()];
    let data = vec![0.0, 1.0, 2.0, 3.0, 0.5, 1.5, 2.5, 3.5, 9.0, 8.0, 7.0, 6.0];
    EmbeddingMatrix::from_rows(labels, 4, data)
        .unwrap()
        .save_safetensors(&embeddings)
        .unwrap();

    let mut cmd = Command::cargo_bin("plm-embed").unwrap();
    cmd.arg("project")
        .arg("--embeddings")
        .arg(&embeddings)
        .arg("--labels")
        .arg(&csvfile)
        .arg("--label-column")
        .arg("id")
        .arg("--sequence-column")
        .arg("seq")
        .arg("--output")
        .arg(&output)
        .arg("--plot")
        .arg(&plot)
        .arg("--n-neighbors")
        .arg("2")
        .arg("--n-epochs")
        .arg("20");

    cmd.assert().success();
    let text = std::fs::read_to_string(&output).unwrap();
    let proteins: Vec<&str> = text
        .lines()
        .skip(1)
        .map(|line| line.split(',').next().unwrap())
        .collect();
    assert_eq!(text.lines().next(), Some("protein,x,y"));
    assert_eq!(proteins, vec!["101", "202", "303"]);
    assert!(plot.exists());
}

#[test]
fn test_cli_project_label_mismatch() {
    let (csvfile, _tmp) = TestFile::proteins_01().create_temp().unwrap();
    let dir = tempdir().unwrap();
    let embeddings = dir.path().join("embeddings.safetensors");
    let output = dir.path().join("umap.csv");
    EmbeddingMatrix::from_rows(vec!["only".to_string()], 2, vec![1.0, 2.0])
        .unwrap()
        .save_safetensors(&embeddings)
        .unwrap();

    let mut cmd = Command::cargo_bin("plm-embed").unwrap();
    cmd.arg("project")
        .arg("--embeddings")
        .arg(&embeddings)
        .arg("--labels")
        .arg(&csvfile)
        .arg("--output")
        .arg(&output);

    cmd.assert().failure();
    assert!(!output.exists());
}

#[test]
fn test_cli_rejects_zero_batch_size() {
    let (csvfile, _tmp) = TestFile::proteins_01().create_temp().unwrap();
    let dir = tempdir().unwrap();
    let output = dir.path().join("umap.csv");

    let mut cmd = Command::cargo_bin("plm-embed").unwrap();
    cmd.arg("run")
        .arg("--dataset")
        .arg(&csvfile)
        .arg("--batch-size")
        .arg("0")
        .arg("--output")
        .arg(&output);

    cmd.assert().failure();
    assert!(!output.exists());
}
