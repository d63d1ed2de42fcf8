//! End-to-end execution tests against the local process backend.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use anyhow::bail;
use pretty_assertions::assert_eq;
use serde_json::Value as JsonValue;
use serde_json::json;
use sluice_analysis::Document;
use sluice_analysis::analyze_source;
use sluice_engine::CacheConfig;
use sluice_engine::Config;
use sluice_engine::DownloadJob;
use sluice_engine::DownloadPlugin;
use sluice_engine::Engine;
use sluice_engine::PluginRegistry;
use sluice_engine::RunFailed;
use sluice_engine::RunOutputs;
use sluice_engine::backend::local::LocalBackend;
use tempfile::TempDir;
use url::Url;

/// Analyzes an in-memory document.
fn analyze(source: &str) -> Arc<Document> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    analyze_source(source, "test.wdl", "/test.wdl", true).expect("document should analyze")
}

/// Creates an engine over the local backend with the given configuration.
fn engine_with(config: Config) -> Engine {
    Engine::new(config, Arc::new(LocalBackend::default()), PluginRegistry::new())
}

/// Runs a workflow from source and returns its outputs.
async fn run_workflow(
    source: &str,
    inputs: JsonValue,
) -> (Result<RunOutputs, RunFailed>, TempDir) {
    let document = analyze(source);
    let engine = engine_with(Config::default());
    let root = TempDir::new().expect("should create a temp dir");
    let result = engine
        .run_workflow(&document, &inputs, root.path(), root.path())
        .await;
    (result, root)
}

#[tokio::test]
async fn arithmetic_and_interpolation() {
    let (result, _root) = run_workflow(
        r#"version 1.0
workflow exprs {
  Float pi = 3.14159
  Int x = 1 + 6 / 3 * 4
  Int y = 2 * (3 + 4)
  String s = "pi = ~{pi}!"
  String e = "~{if false then '~{pi}' else 'e'}"
  output {
    Int out_x = x
    Int out_y = y
    String out_s = s
    String out_e = e
  }
}"#,
        json!({}),
    )
    .await;

    let outputs = result.expect("workflow should succeed").outputs;
    assert_eq!(outputs["exprs.out_x"], json!(9));
    assert_eq!(outputs["exprs.out_y"], json!(14));
    assert_eq!(outputs["exprs.out_s"], json!("pi = 3.141590!"));
    assert_eq!(outputs["exprs.out_e"], json!("e"));
}

#[tokio::test]
async fn short_circuit_never_evaluates_the_untaken_side() {
    let (result, _root) = run_workflow(
        r#"version 1.0
workflow sc {
  Int zero = 0
  Boolean a = false && 1 / zero == 1
  Boolean b = true || 1 / zero == 1
  Int c = if true then 1 else 1 / zero
  output {
    Boolean out_a = a
    Boolean out_b = b
    Int out_c = c
  }
}"#,
        json!({}),
    )
    .await;

    let outputs = result.expect("short-circuiting avoids the division").outputs;
    assert_eq!(outputs["sc.out_a"], json!(false));
    assert_eq!(outputs["sc.out_b"], json!(true));
    assert_eq!(outputs["sc.out_c"], json!(1));
}

#[tokio::test]
async fn division_by_zero_fails_the_job() {
    let (result, _root) = run_workflow(
        "version 1.0\nworkflow boom {\n  Int zero = 0\n  Int x = 1 / zero\n  output { Int out = \
         x }\n}",
        json!({}),
    )
    .await;

    let failed = result.expect_err("division by zero should fail");
    assert_eq!(failed.failure.error.kind(), "EvalError");
    assert_eq!(failed.failure.job_id, "decl-x");
}

#[tokio::test]
async fn task_call_round_trip() {
    let (result, _root) = run_workflow(
        r#"version 1.0
task greet {
  input { String name }
  command <<<
    echo "hello ~{name}"
  >>>
  output { String message = read_string(stdout()) }
}
workflow hello {
  input { String name }
  call greet { input: name = name }
  output { String message = greet.message }
}"#,
        json!({ "hello.name": "world" }),
    )
    .await;

    let outputs = result.expect("workflow should succeed").outputs;
    assert_eq!(outputs["hello.message"], json!("hello world"));
}

#[tokio::test]
async fn scatter_cross_product_preserves_order() {
    let (result, _root) = run_workflow(
        r#"version 1.1
workflow cross {
  input {
    Int m
    Int n
  }
  scatter (i in range(m)) {
    scatter (j in range(n)) {
      Pair[Int, Int] p = (i, j)
    }
  }
  output { Array[Pair[Int, Int]] pairs = flatten(p) }
}"#,
        json!({ "cross.m": 4, "cross.n": 2 }),
    )
    .await;

    let outputs = result.expect("workflow should succeed").outputs;
    let expected: Vec<JsonValue> = (0..4)
        .flat_map(|i| (0..2).map(move |j| json!({ "left": i, "right": j })))
        .collect();
    assert_eq!(outputs["cross.pairs"], JsonValue::Array(expected));
}

#[tokio::test]
async fn scatter_gather_order_is_independent_of_completion_order() {
    let (result, _root) = run_workflow(
        r#"version 1.1
task shout {
  input { Int i }
  command <<<
    sleep 0.~{3 - i}
    echo $(( ~{i} * 10 ))
  >>>
  output { Int out = read_int(stdout()) }
}
workflow order {
  scatter (i in [3, 1, 2]) {
    call shout { input: i = i }
  }
  output { Array[Int] outs = shout.out }
}"#,
        json!({}),
    )
    .await;

    let outputs = result.expect("workflow should succeed").outputs;
    assert_eq!(outputs["order.outs"], json!([30, 10, 20]));
}

#[tokio::test]
async fn conditional_nulls_and_select_all() {
    let (result, _root) = run_workflow(
        r#"version 1.0
workflow cond {
  if (true) {
    Int a = 1
  }
  if (false) {
    Int b = 2
  }
  output { Array[Int] vals = select_all([a, b]) }
}"#,
        json!({}),
    )
    .await;

    let outputs = result.expect("workflow should succeed").outputs;
    assert_eq!(outputs["cond.vals"], json!([1]));
}

#[tokio::test]
async fn empty_scatter_yields_empty_arrays() {
    let (result, _root) = run_workflow(
        r#"version 1.0
workflow empty {
  scatter (i in []) {
    Int doubled = i * 2
  }
  output { Array[Int] all = doubled }
}"#,
        json!({}),
    )
    .await;

    let outputs = result.expect("workflow should succeed").outputs;
    assert_eq!(outputs["empty.all"], json!([]));
}

#[tokio::test]
async fn task_retries_until_success() {
    let source = r#"version 1.1
task flaky {
  input { String marker }
  command <<<
    n=$(cat "~{marker}" 2>/dev/null || echo 0)
    echo $(( n + 1 )) > "~{marker}"
    if [ "$n" -lt 2 ]; then
      exit 1
    fi
    echo ok
  >>>
  runtime {
    maxRetries: 2
  }
  output { String result = read_string(stdout()) }
}"#;

    let document = analyze(source);
    let engine = engine_with(Config::default());
    let root = TempDir::new().unwrap();
    let marker = root.path().join("attempts");

    let result = engine
        .run_task(
            &document,
            "flaky",
            &json!({ "flaky.marker": marker.to_string_lossy() }),
            root.path(),
            root.path(),
        )
        .await
        .expect("the third attempt should succeed");

    assert_eq!(result.outputs["flaky.result"], json!("ok"));

    // Each retry preserves the prior attempt's working directory
    assert!(result.dir.join("work").is_dir());
    assert!(result.dir.join("work2").is_dir());
    assert!(result.dir.join("work3").is_dir());
    assert!(!result.dir.join("work4").exists());
}

#[tokio::test]
async fn retries_exhaust_into_command_failed() {
    let source = r#"version 1.1
task always_fails {
  command <<<
    echo "nope" >&2
    exit 3
  >>>
  runtime {
    maxRetries: 1
  }
}"#;

    let document = analyze(source);
    let engine = engine_with(Config::default());
    let root = TempDir::new().unwrap();

    let failed = engine
        .run_task(&document, "always_fails", &json!({}), root.path(), root.path())
        .await
        .expect_err("the task should fail");

    assert_eq!(failed.failure.error.kind(), "CommandFailed");

    let dir = failed.dir.expect("a run directory was created");
    assert!(dir.join("work").is_dir());
    assert!(dir.join("work2").is_dir());

    // The failure record names the job and points at the captured stderr
    let error: JsonValue =
        serde_json::from_str(&std::fs::read_to_string(dir.join("error.json")).unwrap()).unwrap();
    assert_eq!(error["cause"]["error"], json!("CommandFailed"));
    assert!(
        error["cause"]["stderr_file"]
            .as_str()
            .unwrap()
            .ends_with("stderr.txt")
    );
}

#[tokio::test]
async fn file_sandbox_rejects_unknown_host_paths() {
    let (result, _root) = run_workflow(
        r#"version 1.0
task consume {
  input { File f }
  command <<<
    cat "~{f}"
  >>>
  output { String content = read_string(stdout()) }
}
workflow sneaky {
  File f = "/etc/passwd"
  call consume { input: f = f }
  output { String content = consume.content }
}"#,
        json!({}),
    )
    .await;

    let failed = result.expect_err("the forbidden path should be rejected");
    assert_eq!(failed.failure.error.kind(), "InputError");
    assert!(
        failed
            .failure
            .error
            .to_string()
            .contains("inputs use unknown file")
    );
    assert_eq!(failed.failure.job_id, "call-consume");

    let dir = failed.dir.expect("a run directory was created");
    let error: JsonValue =
        serde_json::from_str(&std::fs::read_to_string(dir.join("error.json")).unwrap()).unwrap();
    assert_eq!(error["cause"]["error"], json!("InputError"));
    assert_eq!(error["job_id"], json!("call-consume"));
}

#[tokio::test]
async fn declared_file_inputs_are_staged_and_readable() {
    let root = TempDir::new().unwrap();
    let input = root.path().join("reads.txt");
    std::fs::write(&input, "line one\nline two\n").unwrap();

    let source = r#"version 1.0
task count_lines {
  input { File reads }
  command <<<
    wc -l < "~{reads}"
  >>>
  output { Int n = read_int(stdout()) }
}
workflow count {
  input { File reads }
  call count_lines { input: reads = reads }
  output { Int n = count_lines.n }
}"#;

    let document = analyze(source);
    let engine = engine_with(Config::default());
    let result = engine
        .run_workflow(
            &document,
            &json!({ "count.reads": input.to_string_lossy() }),
            root.path(),
            root.path(),
        )
        .await
        .expect("workflow should succeed");

    assert_eq!(result.outputs["count.n"], json!(2));
}

#[tokio::test]
async fn sub_workflow_calls_recurse() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("lib.wdl"),
        r#"version 1.1
task inc {
  input { Int n }
  command <<<
    echo $(( ~{n} + 1 ))
  >>>
  output { Int out = read_int(stdout()) }
}
workflow incwf {
  input { Int n }
  call inc { input: n = n }
  output { Int out = inc.out }
}"#,
    )
    .unwrap();
    std::fs::write(
        dir.path().join("main.wdl"),
        r#"version 1.1
import "lib.wdl" as lib
workflow main {
  input { Int n }
  call lib.incwf { input: n = n }
  output { Int out = incwf.out }
}"#,
    )
    .unwrap();

    let document = sluice_analysis::load_document(
        dir.path().join("main.wdl").to_str().unwrap(),
        true,
    )
    .expect("documents should analyze");

    let engine = engine_with(Config::default());
    let result = engine
        .run_workflow(&document, &json!({ "main.n": 41 }), dir.path(), dir.path())
        .await
        .expect("workflow should succeed");

    assert_eq!(result.outputs["main.out"], json!(42));

    // The sub-workflow ran inside the call's directory
    let call_dir = result.dir.join("call-incwf");
    assert!(call_dir.join("call-inc").join("work").is_dir());
    assert!(call_dir.join("outputs.json").is_file());
}

/// A download plugin that fabricates file contents from the URI, exercising
/// the engine's task machinery for the transfer itself.
struct MockDownloader;

impl DownloadPlugin for MockDownloader {
    fn schemes(&self) -> &[&str] {
        &["mock"]
    }

    fn prepare(&self, uri: &Url) -> Result<DownloadJob> {
        let task_source = format!(
            r#"version 1.1
task fetch {{
  command <<<
    printf 'payload:{path}' > downloaded.txt
  >>>
  output {{ File file = "downloaded.txt" }}
}}"#,
            path = uri.path()
        );

        Ok(DownloadJob {
            task_source,
            inputs: json!({}),
            state: Box::new(()),
        })
    }

    fn finalize(
        &self,
        _state: sluice_engine::PluginState,
        outcome: Result<JsonValue, &sluice_engine::RunError>,
    ) -> Result<JsonValue> {
        match outcome {
            Ok(outputs) => Ok(outputs),
            Err(e) => bail!("mock download failed: {e}"),
        }
    }
}

/// Creates an engine with the mock downloader and a shared cache directory.
fn download_engine(cache_dir: &Path) -> Engine {
    let mut config = Config::default();
    config.download_cache = CacheConfig {
        put: true,
        get: true,
        dir: cache_dir.to_path_buf(),
        ..Default::default()
    };

    let mut plugins = PluginRegistry::new();
    plugins.register_download(Arc::new(MockDownloader));
    Engine::new(config, Arc::new(LocalBackend::default()), plugins)
}

/// The consuming task used by the download tests.
const CONSUME_SOURCE: &str = r#"version 1.0
task consume {
  input { File f }
  command <<<
    cat "~{f}"
  >>>
  output { String content = read_string(stdout()) }
}"#;

#[tokio::test]
async fn download_cache_hits_on_second_run() {
    let cache_dir = TempDir::new().unwrap();
    let document = analyze(CONSUME_SOURCE);
    let inputs = json!({ "consume.f": "mock://host/data.txt" });

    let first = download_engine(cache_dir.path());
    let root = TempDir::new().unwrap();
    let result = first
        .run_task(&document, "consume", &inputs, root.path(), root.path())
        .await
        .expect("the download should succeed");
    assert_eq!(result.outputs["consume.content"], json!("payload:/data.txt"));
    assert_eq!(first.download_stats().downloads(), 1);
    assert_eq!(first.download_stats().cached(), 0);

    // A second run against the same cache avoids the download entirely
    let second = download_engine(cache_dir.path());
    let root = TempDir::new().unwrap();
    let result = second
        .run_task(&document, "consume", &inputs, root.path(), root.path())
        .await
        .expect("the cached file should satisfy the input");
    assert_eq!(result.outputs["consume.content"], json!("payload:/data.txt"));
    assert_eq!(second.download_stats().downloads(), 0);
    assert_eq!(second.download_stats().cached(), 1);
}

#[tokio::test]
async fn query_strings_bypass_the_cache() {
    let cache_dir = TempDir::new().unwrap();
    let document = analyze(CONSUME_SOURCE);
    let inputs = json!({ "consume.f": "mock://host/data.txt?signature=abc" });

    for _ in 0..2 {
        let engine = download_engine(cache_dir.path());
        let root = TempDir::new().unwrap();
        engine
            .run_task(&document, "consume", &inputs, root.path(), root.path())
            .await
            .expect("the download should succeed");

        // Every run re-downloads; nothing is cached
        assert_eq!(engine.download_stats().downloads(), 1);
        assert_eq!(engine.download_stats().cached(), 0);
    }
}

#[tokio::test]
async fn rerunning_a_workflow_reproduces_outputs() {
    let source = r#"version 1.1
workflow stable {
  input { Array[Int] xs }
  scatter (x in xs) {
    Int doubled = x * 2
  }
  output {
    Array[Int] all = doubled
    Int total = length(doubled)
  }
}"#;
    let inputs = json!({ "stable.xs": [3, 1, 2] });

    let (first, _root1) = run_workflow(source, inputs.clone()).await;
    let (second, _root2) = run_workflow(source, inputs).await;

    assert_eq!(
        first.expect("first run should succeed").outputs,
        second.expect("second run should succeed").outputs
    );
}

#[tokio::test]
async fn write_functions_produce_task_inputs() {
    let (result, _root) = run_workflow(
        r#"version 1.0
task first_line {
  input { File f }
  command <<<
    head -n 1 "~{f}"
  >>>
  output { String line = read_string(stdout()) }
}
workflow writes {
  Array[String] lines = ["alpha", "beta"]
  File listing = write_lines(lines)
  call first_line { input: f = listing }
  output { String head = first_line.line }
}"#,
        json!({}),
    )
    .await;

    let outputs = result.expect("workflow should succeed").outputs;
    assert_eq!(outputs["writes.head"], json!("alpha"));
}
