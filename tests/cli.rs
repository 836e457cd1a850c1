mod common;

use std::process::Command;

use anyhow::Result;
use assert_cmd::prelude::*;
use common::*;
use predicates::prelude::*;
use rstest::*;

macro_rules! cargo_run {
    ($cmd:expr, $($args:expr),*) => {
        {
            let mut cmd = Command::cargo_bin($cmd)?;
            $(cmd.arg($args);)*
            cmd.assert()
        }
    };
}

#[fixture]
fn conf_dir() -> assert_fs::TempDir {
    assert_fs::TempDir::new().unwrap()
}

#[rstest]
fn index_then_search(conf_dir: assert_fs::TempDir) -> Result<()> {
    let photos = conf_dir.path().join("photos");
    let alice = write_image(&photos, "alice.jpg", &[face(0.1)]);
    write_image(&photos, "bob.jpg", &[face(2.0)]);

    // 图片内容就是提取器的输出，使用 cat 作为提取程序
    cargo_run!("facesearch", "-c", conf_dir.path(), "index", "--oracle-cmd", "cat", &photos)
        .success()
        .stdout(predicate::str::contains("新增/更新: 2"));

    cargo_run!("facesearch", "-c", conf_dir.path(), "search", "--oracle-cmd", "cat", &alice)
        .success()
        .stdout(predicate::str::contains(key(&alice)))
        .stdout(predicate::str::contains("bob.jpg").not());

    cargo_run!("facesearch", "-c", conf_dir.path(), "stats", "--output-format", "json")
        .success()
        .stdout(predicate::str::contains("\"total_files\": 2"));

    // 第二次索引全部跳过
    cargo_run!("facesearch", "-c", conf_dir.path(), "index", "--oracle-cmd", "cat", &photos)
        .success()
        .stdout(predicate::str::contains("跳过: 2"));

    Ok(())
}

#[rstest]
fn search_json_output(conf_dir: assert_fs::TempDir) -> Result<()> {
    let photos = conf_dir.path().join("photos");
    let alice = write_image(&photos, "alice.jpg", &[face(0.1)]);

    cargo_run!("facesearch", "-c", conf_dir.path(), "index", "--oracle-cmd", "cat", &photos).success();
    cargo_run!(
        "facesearch",
        "-c",
        conf_dir.path(),
        "search",
        "--oracle-cmd",
        "cat",
        "--output-format",
        "json",
        &alice
    )
    .success()
    .stdout(predicate::str::contains("\"distance\": 0.0"));

    Ok(())
}

#[rstest]
fn search_with_other_model_fails(conf_dir: assert_fs::TempDir) -> Result<()> {
    let photos = conf_dir.path().join("photos");
    let alice = write_image(&photos, "alice.jpg", &[face(0.1)]);

    cargo_run!("facesearch", "-c", conf_dir.path(), "index", "--oracle-cmd", "cat", &photos).success();
    cargo_run!(
        "facesearch",
        "-c",
        conf_dir.path(),
        "search",
        "--oracle-cmd",
        "cat",
        "--model-version",
        "another-model",
        &alice
    )
    .failure()
    .stderr(predicate::str::contains("re-index"));

    Ok(())
}

#[rstest]
fn search_without_face_fails(conf_dir: assert_fs::TempDir) -> Result<()> {
    let photos = conf_dir.path().join("photos");
    write_image(&photos, "alice.jpg", &[face(0.1)]);
    let nobody = write_image(conf_dir.path(), "nobody.jpg", &[]);

    cargo_run!("facesearch", "-c", conf_dir.path(), "index", "--oracle-cmd", "cat", &photos).success();
    cargo_run!("facesearch", "-c", conf_dir.path(), "search", "--oracle-cmd", "cat", &nobody)
        .failure()
        .stderr(predicate::str::contains("no face detected"));

    Ok(())
}
