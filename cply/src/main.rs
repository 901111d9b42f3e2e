use clap::Parser;
use cply_lib::compress;
use std::fs;
use std::process;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(
    name = "PLY Splat Compressor",
    version = "1.0",
    about = "Compresses Gaussian splat PLY files into the chunked quantized PLY format"
)]
struct Cli {
    #[arg(
        short = 'i',
        long = "input",
        value_name = "INPUT",
        required = true,
        help = "Path to the input PLY file."
    )]
    input: String,

    #[arg(
        short = 'o',
        long = "output",
        value_name = "OUTPUT",
        required = true,
        help = "Path to the output file."
    )]
    output: String,
}

fn main() {
    let cli = Cli::parse();

    let raw_data = fs::read(&cli.input).unwrap_or_else(|e| {
        eprintln!("Error reading input file {}: {}", cli.input, e);
        process::exit(1);
    });

    println!("Input: {} | Output: {}", cli.input, cli.output);

    let start = Instant::now();

    let mut result = Vec::new();
    if let Err(e) = compress(&raw_data, &mut result) {
        eprintln!("Compression failed: {}", e);
        process::exit(1);
    }

    println!("Compression Time: {} ms", start.elapsed().as_millis());

    fs::write(&cli.output, &result).unwrap_or_else(|e| {
        eprintln!("Error writing output '{}': {}", cli.output, e);
        process::exit(1);
    });
    println!("Successfully wrote to '{}'.", cli.output);
}
