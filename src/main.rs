use std::path::PathBuf;

use log::{error, info};

use voicebank::clip_label::CLIP_LABELS;
use voicebank::config::{self, Config};
use voicebank::{CharacterKey, LanguageCode, LookupRequest, VoiceEngine};

const USAGE: &str = "usage: voicebank [--config <path>] <command>

commands:
  play [character] [clip] [language]   resolve a clip, downloading if needed
  fetch <character> [--skin]           download voices for a character
  list                                 list catalogued characters
  labels [character] [language]        list clip labels (all or on disk)
  bind <trigger> <character> <clip> [language]
  unbind <trigger>
  bindings                             list custom bindings
  portraits                            download missing portraits";

fn init_logging() {
    let level = if std::env::var_os("VOICEBANK_DEBUG").is_some() {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    let mut clog = colog::default_builder();
    clog.filter(None, level);
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));
}

fn parse_language(value: Option<&String>) -> Result<Option<LanguageCode>, String> {
    match value {
        None => Ok(None),
        Some(value) => LanguageCode::from_alias(value)
            .map(Some)
            .ok_or_else(|| format!("Unknown language '{value}'")),
    }
}

fn run(engine: &VoiceEngine, command: &str, args: &[String]) -> Result<(), String> {
    match command {
        "play" => {
            let request = LookupRequest {
                character: args.first().cloned(),
                clip: args.get(1).cloned(),
                language: parse_language(args.get(2))?,
            };
            let resolved = engine.lookup(&request).map_err(|err| err.to_string())?;
            if let Some(query) = &resolved.corrected_from {
                info!("'{}' matched {}", query, resolved.character);
            }
            println!(
                "{} [{}] {}: {}",
                resolved.character,
                resolved.language,
                resolved.label,
                resolved.path.display()
            );
            Ok(())
        }
        "fetch" => {
            let name = args.first().ok_or("fetch needs a character name")?;
            let allow_skin = args.iter().any(|arg| arg == "--skin");
            let character = if allow_skin {
                CharacterKey::skin_of(name)
            } else {
                CharacterKey::new(name.as_str())
            };
            let outcome =
                engine.acquire(&character, allow_skin, &engine.settings().download_languages);
            println!("{}", outcome.message);
            if outcome.success {
                Ok(())
            } else {
                Err("download failed".to_string())
            }
        }
        "list" => {
            for (character, languages) in engine.characters() {
                let names: Vec<&str> = languages
                    .iter()
                    .map(|language| language.display_name())
                    .collect();
                println!("{}: {}", character, names.join(" / "));
            }
            Ok(())
        }
        "labels" => {
            let Some(name) = args.first() else {
                println!("{}", CLIP_LABELS.join(" / "));
                return Ok(());
            };
            let character = CharacterKey::new(name.as_str());
            let language = match parse_language(args.get(1))? {
                Some(language) => language,
                None => engine
                    .choose_language(&character, &engine.settings().language_priority)
                    .language()
                    .ok_or_else(|| format!("No voices catalogued for {character}"))?,
            };
            println!("{}", engine.clips(&character, language).join(" / "));
            Ok(())
        }
        "bind" => {
            let [trigger, character, clip, ..] = args else {
                return Err("bind needs <trigger> <character> <clip> [language]".to_string());
            };
            let language = parse_language(args.get(3))?;
            let previous =
                engine.bind(trigger, CharacterKey::new(character.as_str()), clip, language)?;
            match previous {
                Some(previous) => println!(
                    "Rebound '{}' (was {} / {})",
                    trigger, previous.character, previous.clip
                ),
                None => println!("Bound '{}'", trigger),
            }
            Ok(())
        }
        "unbind" => {
            let trigger = args.first().ok_or("unbind needs a trigger")?;
            if engine.unbind(trigger)? {
                println!("Removed '{}'", trigger);
                Ok(())
            } else {
                Err(format!("'{trigger}' is not bound"))
            }
        }
        "bindings" => {
            for (trigger, binding) in engine.bindings() {
                let language = binding
                    .language
                    .map(|language| language.to_string())
                    .unwrap_or_else(|| "default".to_string());
                println!(
                    "{} -> {} / {} ({})",
                    trigger, binding.character, binding.clip, language
                );
            }
            Ok(())
        }
        "portraits" => {
            let report = engine.ensure_portraits();
            println!(
                "portraits: {} fetched, {} cached, {} unavailable, {} failed",
                report.fetched, report.already_cached, report.unavailable, report.failed
            );
            Ok(())
        }
        other => Err(format!("Unknown command '{other}'\n{USAGE}")),
    }
}

fn main() {
    init_logging();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let mut config_path: Option<PathBuf> = None;
    if args.first().map(String::as_str) == Some("--config") {
        if args.len() < 2 {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
        config_path = Some(PathBuf::from(args.remove(1)));
        args.remove(0);
    }
    let Some(command) = args.first().cloned() else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };

    let config = match config_path.or_else(config::default_config_path) {
        Some(path) => config::load_or_create(&path),
        None => config::sanitize_config(Config::default()),
    };
    let engine = match VoiceEngine::open(&config) {
        Ok(engine) => engine,
        Err(err) => {
            error!("Failed to open voice store: {}", err);
            std::process::exit(1);
        }
    };

    if let Err(err) = run(&engine, &command, &args[1..]) {
        error!("{}", err);
        std::process::exit(1);
    }
}
