
mod test_config;
mod test_error;
mod test_model;
mod test_tokenizer;
