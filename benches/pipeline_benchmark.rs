use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::fs;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use tempfile::TempDir;

use theme_pipeline::assets::{AssetKind, Processor};
use theme_pipeline::config::{Config, ProjectConfig};
use theme_pipeline::copier::{copy_file, write_if_changed};
use theme_pipeline::paths::{prefix_path, ProjectPaths};
use theme_pipeline::pipeline::{run_kind, PipelineStats};

/// Create N template sources below `root/src/templates`
fn create_templates(root: &Path, count: usize) {
    for i in 0..count {
        let dir = root.join(format!("src/templates/dir{}", i % 10));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(format!("page{i}.html")), format!("<p>{i}</p>")).unwrap();
    }
}

/// Benchmark path prefixing in its three shapes
fn bench_prefix_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("prefix_path");
    group.bench_function("disjoint", |b| {
        b.iter(|| prefix_path(black_box("css/main.css"), black_box("build/theme"), Some("src")))
    });
    group.bench_function("swap_base_folder", |b| {
        b.iter(|| prefix_path(black_box("src/css/main.css"), black_box("build/theme"), Some("src")))
    });
    group.bench_function("already_rooted", |b| {
        b.iter(|| {
            prefix_path(black_box("build/theme/css/main.css"), black_box("build/theme"), Some("src"))
        })
    });
    group.finish();

    let paths = ProjectPaths::new("/project", "src", "build", "theme", "/public_html");
    c.bench_function("build_to_remote", |b| {
        b.iter(|| paths.build_to_remote(black_box(Path::new("/project/build/theme/css/a.css"))))
    });
}

/// Benchmark the unchanged-output check against a real write
fn bench_write_if_changed(c: &mut Criterion) {
    let temp = TempDir::new().unwrap();
    let dst = temp.path().join("out.bin");

    for (name, size) in [("1kb", 1024), ("1mb", 1024 * 1024)] {
        let content = vec![b'x'; size];
        fs::write(&dst, &content).unwrap();

        c.bench_function(&format!("write_if_changed_unchanged_{name}"), |b| {
            b.iter(|| write_if_changed(black_box(&dst), black_box(&content)).unwrap())
        });

        c.bench_function(&format!("write_if_changed_written_{name}"), |b| {
            b.iter(|| {
                let _ = fs::remove_file(&dst);
                write_if_changed(black_box(&dst), black_box(&content)).unwrap()
            })
        });
    }

    let src = temp.path().join("source.txt");
    fs::write(&src, vec![b'x'; 1024]).unwrap();
    let copy_dst = temp.path().join("copy.txt");
    c.bench_function("copy_file_1kb", |b| {
        b.iter(|| {
            let _ = fs::remove_file(&copy_dst);
            copy_file(black_box(&src), black_box(&copy_dst)).unwrap()
        })
    });
}

/// Benchmark a templates run with different file counts
fn bench_run_kind(c: &mut Criterion) {
    let mut group = c.benchmark_group("run_kind_templates");
    let shutdown = AtomicBool::new(false);

    for file_count in [100, 500, 1000].iter() {
        let temp = TempDir::new().unwrap();
        create_templates(temp.path(), *file_count);
        let processor = Processor::new(Config::for_root(temp.path(), ProjectConfig::default()));
        let build = temp.path().join("build");

        group.throughput(Throughput::Elements(*file_count as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(file_count),
            file_count,
            |b, _| {
                b.iter(|| {
                    let _ = fs::remove_dir_all(&build);
                    run_kind(&processor, AssetKind::Templates, &shutdown, &PipelineStats::new())
                        .unwrap()
                })
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_prefix_path,
    bench_write_if_changed,
    bench_run_kind,
);
criterion_main!(benches);
