// Claves compartidas entre pasos en los parámetros de entrada y el working
// map. Un paso escribe y otro lee, así que viven en un solo lugar.

/// Load tag pedido por el usuario (input) o calculado (working map).
pub const LOAD_TAG: &str = "load_tag";
/// Dataset destino de la carga; también es el recurso que se autoriza.
pub const DATASET_ID: &str = "dataset_id";
/// Cantidad de archivos que la carga de demostración simula ingerir.
pub const FILE_COUNT: &str = "file_count";
/// Archivos efectivamente cargados, escrito por el paso de ingesta.
pub const FILES_LOADED: &str = "files_loaded";
