use chrono::Utc;
use pipeline_ledger::transform::{output_stem, CommandTransformer, CopyTransformer, TransformConfig};
use pipeline_ledger_core::contract::{TransformError, TransformInput, Transformer};

fn input(relative_path: &str, content: &[u8]) -> TransformInput {
    TransformInput {
        path: format!("raw/{relative_path}"),
        relative_path: relative_path.to_string(),
        last_modified: Utc::now(),
        content: content.to_vec(),
    }
}

#[test]
fn test_output_stem_drops_only_the_last_extension() {
    assert_eq!(output_stem("site1/scan.zip"), "site1/scan");
    assert_eq!(output_stem("site1/scan.tar.gz"), "site1/scan.tar");
    assert_eq!(output_stem("site.1/scan"), "site.1/scan");
    assert_eq!(output_stem(".hidden"), ".hidden");
}

#[tokio::test]
async fn test_copy_republishes_input_at_same_relative_path() {
    let outputs = CopyTransformer
        .transform(input("site1/a.txt", b"alpha"))
        .await
        .unwrap();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].relative_path, "site1/a.txt");
    assert_eq!(outputs[0].content, b"alpha".to_vec());
}

#[tokio::test]
async fn test_config_builds_the_selected_transformer() {
    let outputs = TransformConfig::Copy
        .build()
        .transform(input("a.txt", b"a"))
        .await
        .unwrap();
    assert_eq!(outputs[0].relative_path, "a.txt");
}

#[cfg(unix)]
#[tokio::test]
async fn test_command_outputs_land_under_input_stem() {
    let transformer = CommandTransformer::new(
        "sh",
        vec![
            "-c".into(),
            "mkdir -p {output_dir}/frames && cp {input} {output_dir}/copy.bin && echo done > {output_dir}/frames/1.txt".into(),
        ],
    );

    let outputs = transformer
        .transform(input("site1/scan.zip", b"payload"))
        .await
        .unwrap();

    let paths: Vec<&str> = outputs.iter().map(|o| o.relative_path.as_str()).collect();
    assert_eq!(paths, vec!["site1/scan/copy.bin", "site1/scan/frames/1.txt"]);
    assert_eq!(outputs[0].content, b"payload".to_vec());
    assert_eq!(outputs[1].content, b"done\n".to_vec());
}

#[cfg(unix)]
#[tokio::test]
async fn test_command_with_no_outputs_succeeds_empty() {
    let transformer = CommandTransformer::new("true", vec![]);
    let outputs = transformer.transform(input("a.zip", b"a")).await.unwrap();
    assert!(outputs.is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_command_non_zero_exit_is_a_transform_failure() {
    let transformer = CommandTransformer::new(
        "sh",
        vec!["-c".into(), "echo 'unsupported device' >&2; exit 3".into()],
    );

    let err = transformer.transform(input("a.zip", b"a")).await.unwrap_err();
    match err {
        TransformError::Failed(message) => {
            assert!(message.contains("unsupported device"), "got {message}");
        }
        other => panic!("Expected a failed transform, got {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_program_is_an_io_failure() {
    let transformer = CommandTransformer::new("pipeline-ledger-no-such-program", vec![]);
    let err = transformer.transform(input("a.zip", b"a")).await.unwrap_err();
    assert!(matches!(err, TransformError::Io(_)), "got {err:?}");
}
