use anyhow::Context as _;
use clap::{Parser, Subcommand};
use glam::{Quat, Vec3, Vec4};
use kiln_assets::{AssetResolver, FsAssets};
use kiln_common::{ObjectId, Transform};
use kiln_gpu::{HeadlessBackend, HeadlessStats, TextureDesc, TextureFormat, cube};
use kiln_render::{Engine, Renderer, RendererConfig, shaders};
use kiln_scene::{Actor, BlendMode, LightComponent, Material, MeshComponent, SceneContext};
use kiln_tools::SceneInspector;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kiln", about = "Headless driver for the kiln render engine")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Renderer config file (JSON); missing keys keep their defaults
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Load shader sources from this directory instead of the built-in set
    #[arg(long, global = true)]
    shader_root: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct Overrides {
    #[arg(long, global = true)]
    width: Option<u32>,
    #[arg(long, global = true)]
    height: Option<u32>,
    /// Emit debug groups and object labels
    #[arg(long, global = true)]
    debug_labels: bool,
    /// Directory for shader compile/link failure dumps
    #[arg(long, global = true)]
    dump_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print engine version and crate info
    Info,
    /// Render the demo scene for a number of frames
    Run {
        #[arg(short, long, default_value = "120")]
        frames: u64,
        /// Number of crates in the demo scene
        #[arg(long, default_value = "4")]
        crates: usize,
        /// Run update and render on separate threads
        #[arg(long)]
        threaded: bool,
        /// Reload every shader half way through the run
        #[arg(long)]
        reload: bool,
        /// Resize the screen half way through the run, e.g. 800x600
        #[arg(long, value_parser = parse_size)]
        resize: Option<(u32, u32)>,
    },
    /// Build the demo scene, render one frame and print the hierarchy
    Dump {
        #[arg(long, default_value = "4")]
        crates: usize,
        /// Only list the root actors
        #[arg(long)]
        roots_only: bool,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write the effective renderer config as JSON
    Config { output: PathBuf },
    /// Write the built-in shader sources to a directory for editing
    ExportShaders { dir: PathBuf },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Info => {
            println!("kiln v{}", env!("CARGO_PKG_VERSION"));
            println!("assets: {}", kiln_assets::crate_info());
            println!("gpu: {}", kiln_gpu::crate_info());
            println!("scene: {}", kiln_scene::crate_info());
            println!("render: {}", kiln_render::crate_info());
            println!("tools: {}", kiln_tools::crate_info());
            println!(
                "config: {}x{} shadows point={} directional={} threaded={}",
                config.width,
                config.height,
                config.shadows.point_layers,
                config.shadows.directional_layers,
                config.threaded
            );
        }
        Commands::Run {
            frames,
            crates,
            threaded,
            reload,
            resize,
        } => {
            let threaded = threaded || config.threaded;
            let (mut engine, stats) = build_engine(config, cli.shader_root.as_deref())?;
            let demo = populate(&mut engine, crates)?;
            println!("Demo: {crates} crates, {frames} frames, threaded={threaded}");

            let first = frames / 2;
            let mut summary = run_frames(&mut engine, first, threaded)?;
            println!("After {first} frames: {}", SceneInspector::summary(engine.scene(), engine.renderer().context().gpu()));

            if let Some(victim) = demo.removable {
                engine.scene_mut().remove_actor(victim)?;
                println!("Removed actor {victim}; finalized at the next sync point");
            }
            if reload {
                engine.request_shader_reload();
            }
            if let Some((width, height)) = resize {
                engine.resize(width, height)?;
                println!("Resized to {width}x{height}");
            }

            let rest = run_frames(&mut engine, frames - first, threaded)?;
            summary.frames += rest.frames;
            summary.finalized += rest.finalized;
            summary.textures_swept += rest.textures_swept;
            println!(
                "Ran {} frames: finalized={} textures_swept={} draws={}",
                summary.frames,
                summary.finalized,
                summary.textures_swept,
                stats.draw_count()
            );
            println!("{}", SceneInspector::summary(engine.scene(), engine.renderer().context().gpu()));

            let finalized = engine.shutdown();
            println!(
                "Shutdown: finalized={finalized} live programs={} vertex arrays={} textures={}",
                stats.live_programs(),
                stats.live_vertex_arrays(),
                stats.live_textures()
            );
        }
        Commands::Dump {
            crates,
            roots_only,
            json,
        } => {
            let (mut engine, _) = build_engine(config, cli.shader_root.as_deref())?;
            populate(&mut engine, crates)?;
            engine.run_frame(1.0 / 60.0)?;

            print!("{}", SceneInspector::dump_info(engine.scene(), !roots_only));
            let summary = SceneInspector::summary(engine.scene(), engine.renderer().context().gpu());
            if json {
                println!("{}", summary.to_json()?);
            } else {
                println!("{summary}");
            }
            engine.shutdown();
        }
        Commands::Config { output } => {
            config
                .save(&output)
                .with_context(|| format!("writing {}", output.display()))?;
            println!("Wrote {}", output.display());
        }
        Commands::ExportShaders { dir } => {
            for (sub_path, source) in shaders::SOURCES {
                let path = dir.join(sub_path);
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&path, source).with_context(|| format!("writing {}", path.display()))?;
            }
            println!("Exported {} shader sources to {}", shaders::SOURCES.len(), dir.display());
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<RendererConfig> {
    let mut config = match &cli.config {
        Some(path) => RendererConfig::load(path).with_context(|| format!("loading config {}", path.display()))?,
        None => RendererConfig::default(),
    };
    let o = &cli.overrides;
    if let Some(width) = o.width {
        config.width = width;
    }
    if let Some(height) = o.height {
        config.height = height;
    }
    if o.debug_labels {
        config.debug_labels = true;
    }
    if let Some(dir) = &o.dump_dir {
        config.dump_dir = Some(dir.clone());
    }
    Ok(config)
}

fn parse_size(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s.split_once('x').ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s}"))?;
    let parse = |v: &str| v.trim().parse::<u32>().map_err(|e| format!("{v}: {e}"));
    Ok((parse(w)?, parse(h)?))
}

fn build_engine(config: RendererConfig, shader_root: Option<&Path>) -> anyhow::Result<(Engine, HeadlessStats)> {
    let assets: Arc<dyn AssetResolver> = match shader_root {
        Some(root) => Arc::new(FsAssets::new(root.join(".cache")).with_root(root)),
        None => Arc::new(shaders::builtin_assets()),
    };
    let backend = HeadlessBackend::new();
    let stats = backend.stats();
    let gpu = config.create_gpu(Box::new(backend), assets);

    let mut renderer = Renderer::new(gpu, config);
    renderer.register_standard()?;
    renderer.initialize()?;
    let engine = Engine::new(renderer, SceneContext::new())?;
    Ok((engine, stats))
}

fn run_frames(engine: &mut Engine, frames: u64, threaded: bool) -> anyhow::Result<kiln_render::RunSummary> {
    let delta = 1.0 / 60.0;
    let summary = if threaded {
        engine.run_threaded(frames, delta)?
    } else {
        engine.run(frames, delta)?
    };
    Ok(summary)
}

struct Demo {
    /// Actor removed half way through `run`.
    removable: Option<ObjectId>,
}

/// A row of crates sharing one material, a spinning glass cube, a shadowed
/// sun and a point light.
fn populate(engine: &mut Engine, crates: usize) -> anyhow::Result<Demo> {
    let renderer = engine.renderer_mut();
    let slots = renderer.context().shadow_slots().clone();
    let ctx = renderer.context_mut();
    ctx.camera.position = Vec3::new(0.0, 6.0, 12.0);
    ctx.camera.look_at(Vec3::ZERO);

    let gpu = ctx.gpu_mut();
    let albedo = gpu.create_texture(TextureDesc::new_2d("crate.albedo", 256, 256, TextureFormat::Rgba8));
    let mut wood =
        Material::new(gpu, "wood", shaders::standard_material("wood"))?.with_texture(gpu, "u_albedo", albedo)?;
    gpu.release_texture(albedo);
    wood.set("u_tint", Vec4::new(0.8, 0.6, 0.4, 1.0));
    let mut glass =
        Material::new(gpu, "glass", shaders::transparent_material("glass"))?.with_blend(BlendMode::Transparent);
    glass.set("u_tint", Vec4::new(0.6, 0.8, 1.0, 0.4));
    let (vertices, indices) = cube()?;

    let wood = engine.scene_mut().insert(wood)?;
    let glass = engine.scene_mut().insert(glass)?;

    let mut removable = None;
    let offset = (crates as f32 - 1.0) * 1.5;
    for i in 0..crates {
        let position = Vec3::new(i as f32 * 3.0 - offset, 0.0, 0.0);
        let mesh = {
            let gpu = engine.renderer_mut().context_mut().gpu_mut();
            MeshComponent::new(gpu, "crate", &vertices, Some(&indices), wood)
        };
        let scene = engine.scene_mut();
        let actor = scene.spawn_actor(Actor::new(format!("crate{i}")).with_transform(Transform::from_position(position)));
        scene.attach(actor, mesh)?;
        removable.get_or_insert(actor);
    }

    let mesh = {
        let gpu = engine.renderer_mut().context_mut().gpu_mut();
        MeshComponent::new(gpu, "glass", &vertices, Some(&indices), glass).with_shadows(false)
    };
    let scene = engine.scene_mut();
    let spinner = scene.spawn_actor(
        Actor::new("glass")
            .with_transform(Transform::from_position(Vec3::new(0.0, 2.5, 0.0)))
            .with_script(|transform, frame| transform.rotation = Quat::from_rotation_y(frame.elapsed)),
    );
    scene.attach(spinner, mesh)?;

    let sun = scene.spawn_actor(Actor::new("sun"));
    scene.attach(
        sun,
        LightComponent::directional(Vec3::new(-0.4, -1.0, -0.3), Vec3::ONE, 3.0).with_shadow(&slots)?,
    )?;
    let lamp = scene.spawn_child(spinner, Actor::new("lamp").with_transform(Transform::from_position(Vec3::Y)))?;
    scene.attach(lamp, LightComponent::point(Vec3::new(1.0, 0.8, 0.6), 5.0).with_shadow(&slots)?)?;

    tracing::info!(objects = scene.len(), "demo scene populated");
    Ok(Demo { removable })
}
