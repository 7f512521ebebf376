use std::path::PathBuf;
use std::process;

use tessera_cli::report::{self, ProgramSummary, Report};
use tessera_cli::scene::{self, SyntheticImages};
use tessera_core::{LightmapIndex, MaterialHandle};
use tessera_material::{EngineConfig, Registry, Services};
use tessera_render::RecordingBackend;

fn usage() {
    eprintln!("Usage: tessera [OPTIONS]");
    eprintln!("  --scripts <dir>          Directory of .shader files (default: scripts)");
    eprintln!("  --config <path>          Engine config RON");
    eprintln!("  --output <path>          Save the report as JSON");
    eprintln!("  --dump-programs <dir>    Write generated program source");
    eprintln!("  --time <seconds>         Frame time of the replayed view (default: 1)");
    eprintln!("  --sorted                 List materials in draw order");
}

fn value(args: &[String], i: usize, flag: &str) -> String {
    match args.get(i) {
        Some(v) => v.clone(),
        None => {
            eprintln!("{flag} needs a value");
            process::exit(1);
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();

    let mut scripts = PathBuf::from("scripts");
    let mut config_path: Option<PathBuf> = None;
    let mut output_path: Option<PathBuf> = None;
    let mut dump_dir: Option<PathBuf> = None;
    let mut time = 1.0f32;
    let mut sorted = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--scripts" => {
                i += 1;
                scripts = PathBuf::from(value(&args, i, "--scripts"));
            }
            "--config" => {
                i += 1;
                config_path = Some(PathBuf::from(value(&args, i, "--config")));
            }
            "--output" => {
                i += 1;
                output_path = Some(PathBuf::from(value(&args, i, "--output")));
            }
            "--dump-programs" => {
                i += 1;
                dump_dir = Some(PathBuf::from(value(&args, i, "--dump-programs")));
            }
            "--time" => {
                i += 1;
                time = value(&args, i, "--time").parse().unwrap_or_else(|_| {
                    eprintln!("invalid --time value");
                    process::exit(1);
                });
            }
            "--sorted" => sorted = true,
            "--help" | "-h" => {
                usage();
                process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                usage();
                process::exit(1);
            }
        }
        i += 1;
    }

    let config = match &config_path {
        Some(path) => tessera_material::load_config(path).unwrap_or_else(|e| {
            eprintln!("ERROR: {e}");
            process::exit(1);
        }),
        None => EngineConfig::default(),
    };
    let text = tessera_material::load_text_index(&scripts).unwrap_or_else(|e| {
        eprintln!("ERROR: {e}");
        process::exit(1);
    });
    let rejected = text.rejected().to_vec();
    let names: Vec<String> = text.names().into_iter().map(str::to_string).collect();

    let mut images = SyntheticImages::new(1);
    let mut backend = RecordingBackend::new();
    let mut registry = {
        let mut svc = Services {
            images: &mut images,
            compiler: Some(&mut backend),
        };
        Registry::new(config.capabilities, config.renderer, text, &mut svc)
    };

    let mut handles: Vec<MaterialHandle> = Vec::new();
    {
        let mut svc = Services {
            images: &mut images,
            compiler: Some(&mut backend),
        };
        for name in &names {
            let handle = registry.register(name, LightmapIndex::Index(0), &mut svc);
            if handle.0 != 0 && !handles.contains(&handle) {
                handles.push(handle);
            }
        }
    }
    log::info!("compiled {} materials, {} programs", registry.len(), registry.programs().len());

    let frame = scene::standard_frame(time);
    let summary = scene::replay(&registry, &images, &mut backend, &handles, &frame);

    let report = Report {
        materials: registry.list(sorted, &images),
        programs: ProgramSummary::of(&registry),
        frame: summary,
        rejected,
        invented_images: images.invented.len(),
    };

    println!("\n## Materials\n");
    println!("{}", report::format_markdown(&report));

    if let Some(ref path) = output_path {
        report::save_report(path, &report).unwrap_or_else(|e| {
            eprintln!("ERROR: failed to save report: {e}");
            process::exit(1);
        });
        log::info!("Saved report to {}", path.display());
    }

    if let Some(ref dir) = dump_dir {
        match report::dump_programs(dir, registry.programs().programs()) {
            Ok(n) => log::info!("Wrote {} shader sources to {}", n, dir.display()),
            Err(e) => {
                eprintln!("ERROR: failed to dump programs: {e}");
                process::exit(1);
            }
        }
    }
}
