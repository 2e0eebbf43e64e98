#![cfg(unix)]

use assert_cmd::Command;
use predicates::prelude::*;
use pretty_assertions::assert_eq;
use serde_json::Value;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tempfile::TempDir;

// Answers `-C <dir> -V <VAR>` and `-C <dir> describe`.
const FAKE_MAKE: &str = r#"#!/bin/sh
dir="$2"
if [ "$3" = "-V" ]; then
    case "$4" in
        PORTSDIR) echo "$FAKE_PORTSDIR" ;;
        INDEXFILE) echo "INDEX-15" ;;
    esac
    exit 0
fi
if [ -f "$dir/describe.out" ]; then
    cat "$dir/describe.out"
fi
exit 0
"#;

const NGINX_DESCRIBED: &str = "nginx-1.26.2|/usr/ports/www/nginx|/usr/local|Robust web server|/usr/ports/www/nginx/pkg-descr|joneum@FreeBSD.org|www|||fetch-1.0|gmake-4.4.1|pcre2-10.44|https://nginx.org/";
const PCRE_DESCRIBED: &str = "pcre2-10.44|/usr/ports/devel/pcre2|/usr/local|Perl Compatible Regular Expressions|/usr/ports/devel/pcre2/pkg-descr|ports@FreeBSD.org|devel||||||https://www.pcre.org/";

const INDEX_BEFORE: &str = concat!(
    "nginx-1.24.0|/usr/ports/www/nginx|/usr/local|Old comment|/usr/ports/www/nginx/pkg-descr|old@FreeBSD.org|www|gmake-4.4.1 pcre2-10.40|pcre2-10.40 compat-1599999|http://nginx.org/|||\n",
    "pcre2-10.40|/usr/ports/devel/pcre2|/usr/local|Perl Compatible Regular Expressions|/usr/ports/devel/pcre2/pkg-descr|ports@FreeBSD.org|devel|||https://www.pcre.org/|||\n",
    "gone-1.0|/usr/ports/net/gone|/usr/local|Gone|/usr/ports/net/gone/pkg-descr|x@FreeBSD.org|net||||||\n",
    "zsh-5.9|/usr/ports/shells/zsh|/usr/local|Z shell|/usr/ports/shells/zsh/pkg-descr|z@FreeBSD.org|shells|pcre2-10.40|||||\n",
);

const INDEX_AFTER: &str = concat!(
    "nginx-1.26.2|/usr/ports/www/nginx|/usr/local|Robust web server|/usr/ports/www/nginx/pkg-descr|joneum@FreeBSD.org|www|gmake-4.4.1 pcre2-10.44|pcre2-10.44 compat-1500001|https://nginx.org/|||\n",
    "pcre2-10.44|/usr/ports/devel/pcre2|/usr/local|Perl Compatible Regular Expressions|/usr/ports/devel/pcre2/pkg-descr|ports@FreeBSD.org|devel|||https://www.pcre.org/|||\n",
    "zsh-5.9|/usr/ports/shells/zsh|/usr/local|Z shell|/usr/ports/shells/zsh/pkg-descr|z@FreeBSD.org|shells|pcre2-10.44|||||\n",
);

/// Written once, before any test spawns a process, so no child can hold the
/// script open for writing while another execs it.
fn fake_make() -> &'static Path {
    static SCRIPT: OnceLock<PathBuf> = OnceLock::new();
    SCRIPT.get_or_init(|| {
        let path = Path::new(env!("CARGO_TARGET_TMPDIR")).join("portsindexup-fake-make.sh");
        fs::write(&path, FAKE_MAKE).expect("write fake make");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod fake make");
        path
    })
}

struct PortsTree {
    temp: TempDir,
}

impl PortsTree {
    fn new() -> Self {
        fake_make();
        Self {
            temp: TempDir::new().expect("tempdir"),
        }
    }

    fn root(&self) -> &Path {
        self.temp.path()
    }

    fn index(&self) -> PathBuf {
        self.root().join("INDEX-15")
    }

    fn add_port(&self, origin: &str, describe: &str) {
        let dir = self.root().join(origin);
        fs::create_dir_all(&dir).expect("mkdir port");
        fs::write(dir.join("Makefile"), "PORTNAME=test\n").expect("write Makefile");
        fs::write(dir.join("describe.out"), format!("{describe}\n")).expect("write describe");
    }

    fn write_index(&self, contents: &str) {
        fs::write(self.index(), contents).expect("write index");
    }

    fn read_index(&self) -> String {
        fs::read_to_string(self.index()).expect("read index")
    }

    /// Command with every discovery step answered by flags.
    #[allow(deprecated)]
    fn command(&self) -> Command {
        let mut cmd = Command::cargo_bin("portsindexup").expect("binary");
        cmd.env_remove("RUST_LOG")
            .env_remove("PORTSINDEX_JOBS")
            .arg("--make")
            .arg(fake_make())
            .arg("--ports-dir")
            .arg(self.root())
            .arg("--default-ports-dir")
            .arg("/usr/ports")
            .arg("--index-file")
            .arg(self.index())
            .arg("--osreldate")
            .arg("1500001")
            .arg("--jobs")
            .arg("2");
        cmd
    }

    fn populate(&self) {
        self.add_port("www/nginx", NGINX_DESCRIBED);
        self.add_port("devel/pcre2", PCRE_DESCRIBED);
        self.write_index(INDEX_BEFORE);
    }
}

#[test]
fn updates_index_for_positional_origins() {
    let tree = PortsTree::new();
    tree.populate();

    tree.command()
        .args(["www/nginx", "devel/pcre2", "net/gone"])
        .write_stdin("")
        .assert()
        .success()
        .stderr(predicate::str::contains(
            "4 line(s) read, 3 changed, 1 removed",
        ))
        .stderr(predicate::str::contains("written").not());

    assert_eq!(tree.read_index(), INDEX_AFTER);
}

#[test]
fn reads_origins_from_stdin_and_prints_json() {
    let tree = PortsTree::new();
    tree.populate();

    let output = tree
        .command()
        .arg("--json")
        .write_stdin("www/nginx\n\n  devel/pcre2  \nnet/gone\n")
        .output()
        .expect("run");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let body: Value = serde_json::from_slice(&output.stdout).expect("valid json");
    let stats = &body["stats"];
    assert_eq!(stats["origins_requested"], 3);
    assert_eq!(stats["origins_queried"], 2);
    assert_eq!(stats["origins_removed"], 1);
    assert_eq!(stats["merge"]["lines_read"], 4);
    assert_eq!(stats["merge"]["lines_changed"], 3);
    assert_eq!(stats["merge"]["lines_removed"], 1);
    assert_eq!(stats["replaced"], true);
    assert_eq!(body["errors"], Value::Array(Vec::new()));
    assert_eq!(tree.read_index(), INDEX_AFTER);
}

#[test]
fn discovers_ports_dir_and_index_file_through_make() {
    let tree = PortsTree::new();
    tree.write_index(concat!(
        "gone-1.0|/usr/ports/net/gone|/usr/local|Gone|/usr/ports/net/gone/pkg-descr|x@FreeBSD.org|net||||||\n",
        "zsh-5.9|/usr/ports/shells/zsh|/usr/local|Z shell|/usr/ports/shells/zsh/pkg-descr|z@FreeBSD.org|shells||||||\n",
    ));

    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("portsindexup").expect("binary");
    cmd.env_remove("RUST_LOG")
        .env("FAKE_PORTSDIR", tree.root())
        .arg("--make")
        .arg(fake_make())
        .arg("--osreldate")
        .arg("1500001")
        .arg("net/gone")
        .write_stdin("")
        .assert()
        .success()
        .stderr(predicate::str::contains(
            "2 line(s) read, 0 changed, 1 removed",
        ));

    assert_eq!(
        tree.read_index(),
        "zsh-5.9|/usr/ports/shells/zsh|/usr/local|Z shell|/usr/ports/shells/zsh/pkg-descr|z@FreeBSD.org|shells||||||\n"
    );
}

#[test]
fn reports_written_count_when_index_has_malformed_lines() {
    let tree = PortsTree::new();
    tree.write_index(concat!(
        "gone-1.0|/usr/ports/net/gone|/usr/local|Gone|/usr/ports/net/gone/pkg-descr|x@FreeBSD.org|net||||||\n",
        "broken|line\n",
        "zsh-5.9|/usr/ports/shells/zsh|/usr/local|Z shell|/usr/ports/shells/zsh/pkg-descr|z@FreeBSD.org|shells||||||\n",
    ));

    tree.command()
        .arg("net/gone")
        .write_stdin("")
        .assert()
        .success()
        .stderr(predicate::str::contains(
            "3 line(s) read, 0 changed, 1 removed, 1 written",
        ))
        .stderr(predicate::str::contains("invalid number of fields: 2"));
}

#[test]
fn missing_index_file_is_fatal() {
    let tree = PortsTree::new();

    tree.command()
        .arg("net/gone")
        .write_stdin("")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to update"));

    assert!(!tree.index().exists());
}
