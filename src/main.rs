use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
mod auth;
use cryptic::{
    Choices, CipherAlgorithm, Codec, CodecError, Compression, Digest, Document, KeyDerivation,
    Operation, Settings, Storage, Version,
};
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "CRYPTIC_LOG";

#[derive(Debug, clap::Args)]
struct AlgorithmArgs {
    /// Block or stream cipher (AES, Blowfish, CAST-128, Camellia, DES-EDE3, IDEA, Serpent,
    /// Twofish, XChaCha20)
    #[arg(long)]
    cipher: Option<CipherAlgorithm>,

    /// Mode of operation (CBC, CFB, CTR, EAX, GCM, OFB, ECB, Poly1305)
    #[arg(long = "mode")]
    operation: Option<Operation>,

    /// Digest for key derivation and authentication
    #[arg(long)]
    digest: Option<Digest>,

    /// Key derivation function (PBKDF2, Argon2id)
    #[arg(long = "kdf")]
    key_derivation: Option<KeyDerivation>,

    /// Desired key length in bytes
    #[arg(long)]
    key_length: Option<usize>,

    /// Iteration count (Argon2id: time cost)
    #[arg(long)]
    iterations: Option<u32>,

    /// Raise the iteration count until derivation takes this many milliseconds
    #[arg(long = "iteration-time", value_name = "MS")]
    iteration_time_ms: Option<u64>,

    /// Argon2id memory cost in KiB
    #[arg(long = "memory-cost", value_name = "KIB")]
    memory_cost_kib: Option<u32>,

    /// Compression (Identity, Deflate, GZip, ZLib)
    #[arg(long)]
    compression: Option<Compression>,

    /// Compression level 0-9
    #[arg(long = "level", value_parser = clap::value_parser!(u32).range(0..=9))]
    compression_level: Option<u32>,
}

impl AlgorithmArgs {
    fn apply(&self, choices: &mut Choices) {
        if let Some(cipher) = self.cipher {
            choices.cipher = cipher;
        }
        if let Some(operation) = self.operation {
            choices.operation = operation;
        }
        if let Some(digest) = self.digest {
            choices.digest = digest;
        }
        if let Some(key_derivation) = self.key_derivation {
            choices.key_derivation = key_derivation;
        }
        if let Some(key_length) = self.key_length {
            choices.key_length = key_length;
        }
        if let Some(iterations) = self.iterations {
            choices.iterations = iterations;
        }
        if self.iteration_time_ms.is_some() {
            choices.iteration_time_ms = self.iteration_time_ms;
        }
        if let Some(memory_cost_kib) = self.memory_cost_kib {
            choices.memory_cost_kib = memory_cost_kib;
        }
        if let Some(compression) = self.compression {
            choices.compression = compression;
        }
        if let Some(level) = self.compression_level {
            choices.compression_level = level;
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "cryptic")]
#[command(version, about = "Password-encrypted, compressed document containers.")]
struct Cli {
    /// Path to the settings file
    #[arg(long, global = true, value_name = "PATH", env = "CRYPTIC_SETTINGS")]
    settings: Option<PathBuf>,

    /// Log pipeline progress to stderr
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Encrypts a file into a container
    #[command(arg_required_else_help = true)]
    Encrypt {
        input: PathBuf,

        /// Output file (default: replace the input)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Store without encryption
        #[arg(long, default_value_t = false)]
        plain: bool,

        #[command(flatten)]
        algorithms: AlgorithmArgs,
    },

    /// Decrypts a container
    #[command(arg_required_else_help = true)]
    Decrypt {
        input: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Shows the version and header of a container
    #[command(arg_required_else_help = true)]
    Inspect { file: PathBuf },

    /// Shows or stores the default algorithm choices
    Config {
        /// Persist the given flags
        #[arg(long, default_value_t = false)]
        save: bool,

        #[command(flatten)]
        algorithms: AlgorithmArgs,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_settings(path: Option<PathBuf>) -> Result<Settings> {
    let path = match path {
        Some(p) => p,
        None => Settings::default_path()?,
    };
    Settings::load(path)
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Cli::parse();
    init_logging(args.verbose);

    let result = run(args);
    if let Err(e) = &result {
        if e.downcast_ref::<CodecError>().is_some_and(CodecError::is_retryable) {
            eprintln!("hint: check the password and try again");
        }
    }
    result
}

fn run(args: Cli) -> Result<()> {
    let mut settings = load_settings(args.settings)?;

    match args.command {
        Commands::Encrypt {
            input,
            output,
            plain,
            algorithms,
        } => {
            let plaintext = Storage::new(input.clone()).load()?;
            let mut choices = settings.choices().clone();
            algorithms.apply(&mut choices);

            let password = if plain {
                cryptic::SecureBytes::new()
            } else {
                auth::read_new_password_with_confirmation()?
            };

            let target = output.unwrap_or(input);
            let mut doc = Document::new(Storage::new(target.clone()), choices);
            doc.save(&plaintext, &password)?;
            println!("wrote {} ({})", target.display(), doc.version());
        }
        Commands::Decrypt { input, output } => {
            let data = Storage::new(input.clone()).load()?;
            let mut codec = Codec::new(settings.choices().clone());

            let password = match codec.detect_version(&data) {
                Version::Plain => cryptic::SecureBytes::new(),
                _ => auth::read_password()?,
            };
            let plaintext = codec
                .decrypt(&data, &password)
                .with_context(|| format!("failed to open {}", input.display()))?;

            match output {
                Some(path) => {
                    Storage::new(path.clone()).save(&plaintext)?;
                    eprintln!("wrote {}", path.display());
                }
                None => {
                    let mut stdout = std::io::stdout().lock();
                    stdout.write_all(&plaintext)?;
                    stdout.flush()?;
                }
            }
        }
        Commands::Inspect { file } => {
            let mut doc = Document::new(Storage::new(file), settings.choices().clone());
            let version = doc.inspect()?;
            println!("version: {version}");

            if let (Some(header), Some(trailer)) = (doc.codec().header(), doc.codec().trailer()) {
                println!("digest: {}", header.digest());
                println!("key derivation: {}", header.key_derivation());
                if header.key_derivation() == KeyDerivation::Argon2id {
                    println!("memory cost: {} KiB", header.memory_cost_kib());
                }
                println!("iterations: {}", header.iterations());
                println!("key length: {}", header.key_length());
                println!("cipher: {}", header.cipher());
                println!("mode: {}", header.operation());
                println!("compression: {}", trailer.compression());
                if let Some(length) = trailer.length() {
                    println!("length: {length}");
                }
            }
        }
        Commands::Config { save, algorithms } => {
            algorithms.apply(settings.choices_mut());
            if save {
                settings.save()?;
                eprintln!("settings saved to {}", settings.path().display());
            }
            println!("{}", serde_json::to_string_pretty(settings.choices())?);
        }
    }

    Ok(())
}
