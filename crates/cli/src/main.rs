use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use kcfp::commands::{
    decode_command, instrument_command, validate_command, CorpusInputs, InstrumentOptions,
    ValidateOptions,
};

/// Return-address masking and indirect-branch redirection for AArch64 kernel images.
///
/// This CLI is a thin wrapper around `kcfp-core` (exposed in code as `kcfp_core`).
/// It gathers inputs, runs the library and prints the results.
#[derive(Parser, Debug)]
#[command(
    name = "kcfp",
    version,
    about = "Build-time control-flow protection for AArch64 kernel images",
    long_about = None
)]
struct Cli {
    /// Log at debug level (overrides RUST_LOG).
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

/// Where the corpus comes from. Without any of these the cross toolchain is run.
#[derive(Args, Debug, Clone)]
struct CorpusArgs {
    /// `objdump -d` output of the image.
    #[arg(long)]
    disassembly: Option<String>,

    /// `objdump -h` output. Defaults to the image's own ELF section table.
    #[arg(long)]
    sections: Option<String>,

    /// `nm` output of the image.
    #[arg(long)]
    symbols: Option<String>,
}

impl From<CorpusArgs> for CorpusInputs {
    fn from(args: CorpusArgs) -> Self {
        CorpusInputs { disassembly: args.disassembly, sections: args.sections, symbols: args.symbols }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Instrument a kernel image.
    ///
    /// Writes `<image>.instr` unless `--output` or `--in-place` is given,
    /// then validates the result against the original.
    Instrument {
        /// Kernel image (vmlinux) to instrument.
        #[arg(long)]
        image: String,

        /// Kernel `.config` selecting ROPP/JOPP and the JOPP magic.
        #[arg(long)]
        config: String,

        /// Where to write the instrumented image.
        #[arg(long, conflicts_with = "in_place")]
        output: Option<String>,

        /// Patch the image itself instead of a copy.
        #[arg(long, default_value_t = false)]
        in_place: bool,

        /// Worker threads for the rewrite passes.
        #[arg(long, default_value_t = 1)]
        threads: usize,

        #[command(flatten)]
        corpus: CorpusArgs,

        /// Skip policy (JSON or YAML).
        #[arg(long)]
        policy: Option<String>,

        /// Instrument a single function.
        #[arg(long, conflicts_with_all = ["from", "to"])]
        function: Option<String>,

        /// Disassembly line of `--function` when the name is defined more than once.
        #[arg(long, requires = "function")]
        function_line: Option<usize>,

        /// First function of a range (listing order).
        #[arg(long, requires = "to")]
        from: Option<String>,

        /// Last function of a range (listing order).
        #[arg(long, requires = "from")]
        to: Option<String>,

        /// Directory receiving copies of the config, pre-image and patched image.
        #[arg(long)]
        keep_copies: Option<String>,

        /// Register holding the masked return address.
        #[arg(long, default_value_t = 16)]
        mask_reg: u8,

        /// Register holding the return-address key.
        #[arg(long, default_value_t = 17)]
        key_reg: u8,

        /// Do not validate the instrumented image.
        #[arg(long, default_value_t = false)]
        skip_validation: bool,

        /// Write a JSON run report to this path.
        #[arg(long)]
        report: Option<String>,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Validate an instrumented image against its original.
    Validate {
        /// Image before instrumentation.
        #[arg(long)]
        original: String,

        /// Image after instrumentation.
        #[arg(long)]
        instrumented: String,

        /// Kernel `.config` the image was instrumented with.
        #[arg(long)]
        config: String,

        #[command(flatten)]
        corpus: CorpusArgs,

        /// Skip policy (JSON or YAML).
        #[arg(long)]
        policy: Option<String>,

        #[arg(long, default_value_t = 16)]
        mask_reg: u8,

        #[arg(long, default_value_t = 17)]
        key_reg: u8,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Decode raw instruction words (hex).
    Decode {
        /// One or more 32-bit words, e.g. `94000010` or `0xd65f03c0`.
        #[arg(required = true)]
        words: Vec<String>,

        /// Address of the first word.
        #[arg(long, default_value = "0")]
        address: String,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    kcfp::init_tracing(cli.verbose);

    match cli.command {
        Command::Instrument {
            image,
            config,
            output,
            in_place,
            threads,
            corpus,
            policy,
            function,
            function_line,
            from,
            to,
            keep_copies,
            mask_reg,
            key_reg,
            skip_validation,
            report,
            json,
        } => instrument_command(&InstrumentOptions {
            image,
            config,
            output,
            in_place,
            threads,
            inputs: corpus.into(),
            policy,
            function,
            function_line,
            from,
            to,
            keep_copies,
            mask_reg,
            key_reg,
            skip_validation,
            report,
            json,
        })?,
        Command::Validate {
            original,
            instrumented,
            config,
            corpus,
            policy,
            mask_reg,
            key_reg,
            json,
        } => validate_command(&ValidateOptions {
            original,
            instrumented,
            config,
            inputs: corpus.into(),
            policy,
            mask_reg,
            key_reg,
            json,
        })?,
        Command::Decode { words, address, json } => decode_command(&words, &address, json)?,
    }

    Ok(())
}
