pub mod genome_alignment;
