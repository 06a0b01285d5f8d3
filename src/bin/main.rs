use anyhow::{bail, Context, Result};
use clap::builder::TypedValueParser;
use clap::{Parser, Subcommand};
use dicom_core::Tag;
use env_logger::Builder;
use imaging_anonymization::dictionary::{DictionaryBuilder, TagDictionary};
use imaging_anonymization::engine::AnonymizationEngine;
use imaging_anonymization::methods::Method;
use imaging_anonymization::workflow::{
    DecryptionSession, DicomSession, LocalTransport, VolumeSession,
};
use imaging_anonymization::{AnonymizationError, Anonymizer};
use log::{warn, Level, LevelFilter};
use rayon::prelude::*;
use std::ffi::OsStr;
use std::str::FromStr;
use std::{
    fs,
    fs::File,
    io::{self, Write},
    path::{Path, PathBuf},
};
use walkdir::WalkDir;

#[derive(Clone)]
struct TagValueParser;

impl TypedValueParser for TagValueParser {
    type Value = Tag;

    fn parse_ref(
        &self,
        _cmd: &clap::Command,
        _arg: Option<&clap::Arg>,
        value: &std::ffi::OsStr,
    ) -> Result<Self::Value, clap::Error> {
        let s = value.to_str().ok_or_else(|| {
            clap::Error::raw(
                clap::error::ErrorKind::InvalidUtf8,
                "invalid exclude tag(s)",
            )
        })?;

        Tag::from_str(s).map_err(|_e| {
            clap::Error::raw(
                clap::error::ErrorKind::InvalidValue,
                format!("{s} is not a valid tag"),
            )
        })
    }
}

#[derive(Clone)]
struct MethodValueParser;

impl TypedValueParser for MethodValueParser {
    type Value = Method;

    fn parse_ref(
        &self,
        _cmd: &clap::Command,
        _arg: Option<&clap::Arg>,
        value: &std::ffi::OsStr,
    ) -> Result<Self::Value, clap::Error> {
        let s = value.to_str().ok_or_else(|| {
            clap::Error::raw(clap::error::ErrorKind::InvalidUtf8, "invalid method")
        })?;

        Method::from_str(s).map_err(|err| {
            clap::Error::raw(clap::error::ErrorKind::InvalidValue, format!("{err}"))
        })
    }
}

/// Anonymize medical imaging files
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Show more verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Anonymize DICOM files
    Anonymize(AnonymizeArgs),

    /// Recover identifying metadata from an encrypted DICOM file
    Decrypt(DecryptArgs),

    /// Render original and processed projections of a NIFTI volume
    Volume(VolumeArgs),
}

#[derive(clap::Args, Debug)]
struct AnonymizeArgs {
    /// Input file ('-' for stdin) or directory
    #[arg(short, long, value_name = "INPUT_PATH")]
    input: PathBuf,

    /// Output file ('-' for stdout) or directory
    #[arg(short, long, value_name = "OUTPUT_PATH")]
    output: PathBuf,

    /// Anonymization method: suppression, randomization or encryption
    #[arg(short, long, default_value = "suppression", value_parser = MethodValueParser)]
    method: Method,

    /// Where to write the key material of an encryption run
    /// (default: the output path with a '.key' extension)
    #[arg(short, long, value_name = "KEY_PATH")]
    key_output: Option<PathBuf>,

    /// Recursively look for files in input directory
    #[arg(short, long)]
    recursive: bool,

    /// Continue when file found is not DICOM
    #[arg(short, long = "continue")]
    r#continue: bool,

    /// Tags to exclude from anonymization, e.g. "00100020,00080050"
    #[arg(long, value_name = "TAGS", value_delimiter = ',', value_parser = TagValueParser)]
    exclude: Vec<Tag>,
}

#[derive(clap::Args, Debug)]
struct DecryptArgs {
    /// Encrypted DICOM file
    #[arg(short, long, value_name = "INPUT_PATH")]
    input: PathBuf,

    /// Key file issued when the input was encrypted
    #[arg(short, long, value_name = "KEY_PATH")]
    key: PathBuf,

    /// Output file for the recovered metadata JSON ('-' or absent for stdout)
    #[arg(short, long, value_name = "OUTPUT_PATH")]
    output: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct VolumeArgs {
    /// Volume file (.nii or .nii.gz)
    #[arg(short, long, value_name = "INPUT_PATH")]
    input: PathBuf,

    /// Output directory for the rendered projections
    #[arg(short, long, value_name = "OUTPUT_DIR")]
    output: PathBuf,
}

fn file_name(path: &Path) -> Result<&str> {
    path.file_name()
        .and_then(OsStr::to_str)
        .with_context(|| format!("{} has no usable file name", path.display()))
}

fn build_dictionary(exclude: &[Tag]) -> TagDictionary {
    let mut builder = DictionaryBuilder::default();
    for tag in exclude {
        builder = builder.non_identifying(*tag);
    }
    builder.build()
}

fn key_output_path(args: &AnonymizeArgs) -> Result<PathBuf> {
    match &args.key_output {
        Some(path) => Ok(path.clone()),
        None if args.output == Path::new("-") => {
            bail!("--key-output is required when encrypting to stdout")
        }
        None => Ok(args.output.with_extension("key")),
    }
}

/// Run a single named file through the anonymization workflow session.
fn anonymize_via_session(
    transport: &LocalTransport,
    dictionary: &TagDictionary,
    args: &AnonymizeArgs,
) -> Result<()> {
    let name = file_name(&args.input)?;
    let bytes = fs::read(&args.input)
        .with_context(|| format!("failed to open {}", args.input.display()))?;

    let mut session = DicomSession::new(transport, dictionary);
    session.select_file(name, bytes)?;
    session.load_metadata()?;
    session.start_anonymization(args.method)?;

    let result = session
        .result()
        .context("anonymization finished without a result")?;

    if args.output == Path::new("-") {
        io::stdout().lock().write_all(&result.bytes)?;
    } else {
        fs::write(&args.output, &result.bytes)
            .with_context(|| format!("failed to create {}", args.output.display()))?;
    }

    if args.method == Method::Encryption {
        let key_bytes = session.download_key()?;
        let key_path = key_output_path(args)?;
        fs::write(&key_path, key_bytes)
            .with_context(|| format!("failed to create {}", key_path.display()))?;
    }

    Ok(())
}

/// Anonymize stdin directly through the library facade (there is no file
/// name to validate).
fn anonymize_stdin(engine: &AnonymizationEngine, args: &AnonymizeArgs) -> Result<()> {
    let anonymizer = Anonymizer::new(engine.clone());
    let anonymized = anonymizer
        .anonymize(io::stdin().lock(), args.method)
        .context("failed to anonymize stdin")?;

    if args.output == Path::new("-") {
        anonymized.write(io::stdout().lock())?;
    } else {
        let out = File::create(&args.output)
            .with_context(|| format!("failed to create {}", args.output.display()))?;
        anonymized.write(out)?;
    }

    if let Some(key) = &anonymized.key {
        let key_path = key_output_path(args)?;
        fs::write(&key_path, key.serialize())
            .with_context(|| format!("failed to create {}", key_path.display()))?;
    }

    Ok(())
}

fn anonymize_one(
    anonymizer: &Anonymizer,
    method: Method,
    input_path: &Path,
    output_dir: &Path,
) -> Result<()> {
    let input = File::open(input_path)
        .with_context(|| format!("failed to open {}", input_path.display()))?;

    let anonymized = anonymizer
        .anonymize(input, method)
        .with_context(|| format!("failed to anonymize {}", input_path.display()))?;

    let output_path = output_dir.join(file_name(input_path)?);
    let output = File::create(&output_path)
        .with_context(|| format!("failed to create {}", output_path.display()))?;
    anonymized.write(output)?;

    if let Some(key) = &anonymized.key {
        let key_path = output_path.with_extension("key");
        fs::write(&key_path, key.serialize())
            .with_context(|| format!("failed to create {}", key_path.display()))?;
    }

    Ok(())
}

fn run_anonymize(args: AnonymizeArgs) -> Result<()> {
    let dictionary = build_dictionary(&args.exclude);
    let engine = AnonymizationEngine::new(dictionary.clone());

    // Input is stdin
    if args.input == Path::new("-") {
        return anonymize_stdin(&engine, &args);
    }

    // Input is a single file: run it through the workflow session
    if args.input.is_file() {
        let transport = LocalTransport::new(engine);
        return anonymize_via_session(&transport, &dictionary, &args);
    }

    // Input is a directory
    if args.input.is_dir() {
        if args.output == Path::new("-") || !args.output.is_dir() {
            bail!("output path should be an existing directory");
        }

        let anonymizer = Anonymizer::new(engine);
        let continue_on_read_error = args.r#continue;

        let mut walk_dir = WalkDir::new(&args.input);
        if !args.recursive {
            walk_dir = walk_dir.max_depth(1);
        }

        // Process files
        walk_dir
            .into_iter()
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let path_buf = entry.into_path();
                if path_buf.is_file() {
                    Some(path_buf)
                } else {
                    None
                }
            })
            .par_bridge() // convert to a parallel iterator
            .try_for_each(|path_buf| {
                let result = anonymize_one(&anonymizer, args.method, &path_buf, &args.output);
                match result {
                    Err(e) if continue_on_read_error => {
                        if let Some(&AnonymizationError::ReadError(_)) =
                            e.downcast_ref::<AnonymizationError>()
                        {
                            warn!("{}", e);
                            return Ok(());
                        }
                        Err(e)
                    }
                    Err(e) => Err(e),
                    Ok(v) => Ok(v),
                }
            })?;

        return Ok(());
    }

    bail!("Input should either be a file, stdin ('-') or a directory");
}

fn run_decrypt(args: DecryptArgs) -> Result<()> {
    let dictionary = TagDictionary::default();
    let transport = LocalTransport::new(AnonymizationEngine::new(dictionary.clone()));

    let container_name = file_name(&args.input)?;
    let container_bytes = fs::read(&args.input)
        .with_context(|| format!("failed to open {}", args.input.display()))?;
    let key_name = file_name(&args.key)?;
    let key_bytes =
        fs::read(&args.key).with_context(|| format!("failed to open {}", args.key.display()))?;

    let mut session = DecryptionSession::new(&transport, &dictionary);
    session.select_container(container_name, container_bytes)?;
    session.select_key(key_name, key_bytes)?;
    session.load_metadata()?;
    session.start_decryption()?;

    let recovered = session
        .recovered()
        .context("decryption finished without a result")?;
    let json = serde_json::to_string_pretty(recovered)?;

    match &args.output {
        Some(path) if path != Path::new("-") => fs::write(path, json)
            .with_context(|| format!("failed to create {}", path.display()))?,
        _ => writeln!(io::stdout().lock(), "{json}")?,
    }

    Ok(())
}

fn run_volume(args: VolumeArgs) -> Result<()> {
    let transport = LocalTransport::default();

    let name = file_name(&args.input)?;
    let bytes = fs::read(&args.input)
        .with_context(|| format!("failed to open {}", args.input.display()))?;

    let mut session = VolumeSession::new(&transport);
    session.select_file(name, bytes)?;
    session.start_processing()?;

    let result = session
        .result()
        .context("volume processing finished without a result")?;

    fs::create_dir_all(&args.output)
        .with_context(|| format!("failed to create {}", args.output.display()))?;

    let sets = [
        ("original", &result.original),
        ("processed", &result.processed),
    ];
    for (prefix, set) in sets {
        let slices = [
            ("axial", &set.axial),
            ("coronal", &set.coronal),
            ("sagittal", &set.sagittal),
        ];
        for (plane, slice) in slices {
            // absent projections are simply not written
            if let Some(slice) = slice {
                let path = args.output.join(format!("{prefix}_{plane}.png"));
                fs::write(&path, &slice.png)
                    .with_context(|| format!("failed to create {}", path.display()))?;
            }
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        LevelFilter::Info
    } else {
        LevelFilter::Error
    };

    let mut builder = Builder::from_default_env();
    builder
        .format(|buf, record| {
            let level = match record.level() {
                Level::Error => "Error",
                Level::Warn => "Warning",
                Level::Info => "Info",
                Level::Debug => "Debug",
                Level::Trace => "Trace",
            };
            writeln!(buf, "{}: {}", level, record.args())
        })
        .filter(None, log_level);
    builder.init();

    match args.command {
        Command::Anonymize(anonymize_args) => run_anonymize(anonymize_args),
        Command::Decrypt(decrypt_args) => run_decrypt(decrypt_args),
        Command::Volume(volume_args) => run_volume(volume_args),
    }
}
