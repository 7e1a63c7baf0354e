use clap::{Args, Parser, Subcommand, ValueEnum};
use std::collections::HashSet;
use std::path::PathBuf;

use signet::config::{load_config, BuildParams};
use signet::progress::LogSink;
use signet::query::QueryEngine;
use signet::{
    build_classic, build_compact, BackendKind, DocumentFilter, DocumentKind, DocumentList, Result,
};

#[derive(Parser)]
#[command(name = "signet")]
#[command(about = "Bloom-filter signature-matrix index for sequence collections")]
#[command(
    long_about = "Signet indexes a directory of sequence documents so that approximate
membership queries (\"which documents contain all q-grams of this
sequence?\") run at interactive latency.

WORKFLOW:
  1. Build an index:   signet build-compact -i corpus/ -o corpus.sgnx
  2. Query it:         signet query -i corpus.sgnx -q ACGTACGTACGT

INPUT KINDS (by extension):
  .txt       whole file is one document
  .fasta     one sub-document per record
  .fastq     one sub-document per record (quality lines ignored)
  .ctx       Cortex de-Bruijn graph (term field of each record)
  .cobs_doc  pre-built k-mer buffer, streamed verbatim

The classic form gives every document the same signature size; the compact
form groups documents into size classes so small documents share small
signatures, typically shrinking the index several-fold."
)]
#[command(after_help = "EXAMPLES:
  # Compact index with canonical k-mers
  signet build-compact -i corpus/ -o corpus.sgnx -q 31 --canonical

  # Query through the mmap backend, top 20 hits
  signet query -i corpus.sgnx -q ACGTACGTACGTACGTACGTACGTACGTACGT --backend mmap --top 20

  # Restrict a query to two documents
  signet query -i corpus.sgnx -q ACGTACGT... --filter sample1 --filter sample7")]
struct Cli {
    /// Increase verbosity (-v: progress, -vv: debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a classic index: one signature size shared by every document
    BuildClassic {
        /// Directory to scan for documents
        #[arg(short, long)]
        input: PathBuf,

        /// Output index path
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        build: BuildArgs,
    },

    /// Build a compact index: documents grouped into page-aligned size classes
    BuildCompact {
        /// Directory to scan for documents
        #[arg(short, long)]
        input: PathBuf,

        /// Output index path
        #[arg(short, long)]
        output: PathBuf,

        /// Documents per sub-index (size class); multiple of 8
        #[arg(short, long, default_value_t = 64)]
        group_size: usize,

        /// Device page size the layout aligns to
        #[arg(long, default_value_t = 4096)]
        page_size: usize,

        #[command(flatten)]
        build: BuildArgs,
    },

    /// Rank documents by how many of the query's q-grams they contain
    Query {
        /// Index file to query
        #[arg(short, long)]
        index: PathBuf,

        /// Query sequence
        #[arg(short = 'q', long)]
        sequence: String,

        /// Number of results to return
        #[arg(short, long, default_value_t = 100)]
        top: usize,

        /// Drop documents with fewer matching terms than this
        #[arg(short = 'm', long, default_value_t = 1)]
        min_count: u32,

        /// I/O backend for row reads
        #[arg(short, long, value_enum, default_value = "buffered")]
        backend: BackendArg,

        /// Async-direct request ring capacity
        #[arg(long, default_value_t = 1024)]
        ring_capacity: usize,

        /// Only report these document names (repeatable)
        #[arg(long)]
        filter: Vec<String>,
    },
}

#[derive(Args)]
struct BuildArgs {
    /// q-gram width
    #[arg(short = 'q', long, default_value_t = 31)]
    term_size: usize,

    /// Bloom hash functions per term
    #[arg(short = 'k', long, default_value_t = 3)]
    num_hashes: u16,

    /// Target false-positive rate per term, in (0, 1)
    #[arg(short = 'p', long, default_value_t = 0.3)]
    false_positive_rate: f64,

    /// Canonicalize terms (min of term and reverse complement)
    #[arg(long)]
    canonical: bool,

    /// Documents per build batch; multiple of 8
    #[arg(short, long, default_value_t = 32)]
    batch_size: usize,

    /// Worker threads (0 = all cores)
    #[arg(short = 'j', long, default_value_t = 0)]
    threads: usize,

    /// Only index documents of this kind
    #[arg(long, value_enum, default_value = "any")]
    file_type: FileTypeArg,

    /// TOML config file; its [index] entries override the flags
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl BuildArgs {
    fn params(&self, group_size: usize, page_size: usize) -> Result<BuildParams> {
        let base = BuildParams {
            term_size: self.term_size,
            num_hashes: self.num_hashes,
            false_positive_rate: self.false_positive_rate,
            canonicalize: self.canonical,
            batch_size: self.batch_size,
            group_size,
            page_size,
            threads: self.threads,
            ..BuildParams::default()
        };
        let params = match &self.config {
            Some(path) => load_config(path, base)?,
            None => {
                base.validate()?;
                base
            }
        };
        if params.threads > 0 {
            rayon::ThreadPoolBuilder::new()
                .num_threads(params.threads)
                .build_global()
                .ok();
        }
        Ok(params)
    }
}

#[derive(ValueEnum, Clone, Copy)]
enum FileTypeArg {
    Any,
    Text,
    Cortex,
    KmerBuffer,
    Fasta,
    Fastq,
}

impl From<FileTypeArg> for DocumentFilter {
    fn from(arg: FileTypeArg) -> Self {
        match arg {
            FileTypeArg::Any => DocumentFilter::Any,
            FileTypeArg::Text => DocumentFilter::Only(DocumentKind::Text),
            FileTypeArg::Cortex => DocumentFilter::Only(DocumentKind::Cortex),
            FileTypeArg::KmerBuffer => DocumentFilter::Only(DocumentKind::KmerBuffer),
            FileTypeArg::Fasta => DocumentFilter::Only(DocumentKind::Fasta),
            FileTypeArg::Fastq => DocumentFilter::Only(DocumentKind::Fastq),
        }
    }
}

#[derive(ValueEnum, Clone, Copy)]
enum BackendArg {
    Buffered,
    Mmap,
    Aio,
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Buffered => BackendKind::Buffered,
            BackendArg::Mmap => BackendKind::Mmap,
            BackendArg::Aio => BackendKind::AsyncDirect,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    signet::logging::init_logger(cli.verbose);

    if let Err(err) = run(cli.command) {
        eprintln!("error: {}: {}", err.kind(), err);
        std::process::exit(1);
    }
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::BuildClassic {
            input,
            output,
            build,
        } => {
            let params = build.params(BuildParams::default().group_size, 4096)?;
            let list = DocumentList::from_directory(&input, build.file_type.into())?;
            log::info!("indexing {} documents", list.len());
            build_classic(&list, &output, &params, &LogSink, None)
        }

        Commands::BuildCompact {
            input,
            output,
            group_size,
            page_size,
            build,
        } => {
            let params = build.params(group_size, page_size)?;
            let list = DocumentList::from_directory(&input, build.file_type.into())?;
            log::info!("indexing {} documents", list.len());
            build_compact(&list, &output, &params, &LogSink, None)
        }

        Commands::Query {
            index,
            sequence,
            top,
            min_count,
            backend,
            ring_capacity,
            filter,
        } => {
            let mut engine = QueryEngine::open(&index, backend.into(), ring_capacity)?;
            let names: Option<HashSet<String>> = if filter.is_empty() {
                None
            } else {
                Some(filter.into_iter().collect())
            };
            let hits = engine.query(sequence.as_bytes(), top, min_count, names.as_ref(), None)?;
            use std::io::Write;
            let mut stdout = std::io::stdout().lock();
            for hit in hits {
                writeln!(stdout, "{}\t{}", hit.name, hit.count)
                    .map_err(|e| signet::SignetError::io("stdout", "write", e))?;
            }
            Ok(())
        }
    }
}
