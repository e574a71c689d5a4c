use khm::{EncodeOptions, Model, NamePolicy};
use std::path::PathBuf;
use std::process::ExitCode;

fn print_summary(model: &Model) {
    println!("bones:   {}", model.bones.len());
    println!("helpers: {}", model.helpers.len());
    match &model.mesh {
        Some(mesh) => println!(
            "mesh:    '{}' id={} vertices={} triangles={} uv_maps={} skinned={} \
             collisions={} volume={:.3}",
            mesh.node.name,
            mesh.node.id,
            mesh.vertex_count(),
            mesh.triangle_count(),
            mesh.uv_maps.len(),
            mesh.skin.is_some(),
            mesh.collisions.len(),
            mesh.volume(),
        ),
        None => println!("mesh:    none"),
    }
    match &model.animation {
        Some(anim) => println!(
            "anim:    nodes={} frames={} length={}s frame={:.2}ms",
            anim.nodes.len(),
            anim.frame_count,
            anim.end_time,
            anim.frame_duration_ms(),
        ),
        None => println!("anim:    none"),
    }
    if let Some(mask) = &model.animation_mask {
        let masked = mask.entries.iter().filter(|e| e.masked).count();
        println!("mask:    {masked}/{} bones", mask.entries.len());
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let mut positional = Vec::<String>::new();
    let mut summary = false;
    let mut reencode: Option<PathBuf> = None;
    let mut strict_names = false;

    let mut i = 0usize;
    while i < args.len() {
        match args[i].as_str() {
            "--summary" => {
                summary = true;
                i += 1;
            }
            "--strict-names" => {
                strict_names = true;
                i += 1;
            }
            "--reencode" => {
                reencode = args.get(i + 1).map(PathBuf::from);
                i += 2;
            }
            other => {
                positional.push(other.to_string());
                i += 1;
            }
        }
    }

    let Some(path) = positional.first().map(PathBuf::from) else {
        eprintln!(
            "usage: khm_dump <model.khm> [--summary] [--reencode <out.khm>] [--strict-names]"
        );
        return ExitCode::from(2);
    };

    let model = match Model::load(&path) {
        Ok(model) => model,
        Err(e) => {
            eprintln!("{}: {e}", path.display());
            return ExitCode::FAILURE;
        }
    };

    if summary {
        print_summary(&model);
    } else {
        match model.to_json_string() {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("{e}");
                return ExitCode::FAILURE;
            }
        }
    }

    if let Some(out) = reencode {
        let options = EncodeOptions {
            name_policy: if strict_names {
                NamePolicy::Reject
            } else {
                NamePolicy::Truncate
            },
        };
        if let Err(e) = model.save(&out, &options) {
            eprintln!("{}: {e}", out.display());
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}
