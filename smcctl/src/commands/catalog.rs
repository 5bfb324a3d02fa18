use clap::{Args, Subcommand};

#[derive(Subcommand, Debug)]
pub enum CatalogCommands {
    /// Lista os vídeos encontrados no diretório de dados
    List(CatalogListArgs),
}

#[derive(Args, Debug)]
pub struct CatalogListArgs {
    /// Limite de registros
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}
